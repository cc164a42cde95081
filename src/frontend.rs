//! Render and input collaborators the coordinator talks to once per turn.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::constants::KEY_QUIT;
use crate::types::{DisplayMode, Frame};

/// Fire-and-forget sink for frames.
pub trait Renderer: Send + Sync {
    fn render(&self, frame: &Frame, mode: DisplayMode);
}

/// Produces at most one key per turn; `None` means no key was pressed.
pub trait InputSource: Send + Sync {
    fn poll_key(&self) -> Option<char>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&self, _frame: &Frame, _mode: DisplayMode) {}
}

/// Dumps every frame to the debug log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&self, frame: &Frame, mode: DisplayMode) {
        debug!(?mode, "frame\n{frame}");
    }
}

/// Keeps every frame it is given.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    frames: Mutex<Vec<(DisplayMode, Frame)>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<(DisplayMode, Frame)> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<(DisplayMode, Frame)> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, frame: &Frame, mode: DisplayMode) {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((mode, frame.clone()));
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll_key(&self) -> Option<char> {
        None
    }
}

/// Replays a fixed key sequence, one entry per turn.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    keys: Mutex<VecDeque<Option<char>>>,
    quit_when_exhausted: bool,
}

impl ScriptedInput {
    pub fn new(keys: impl IntoIterator<Item = Option<char>>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().collect()),
            quit_when_exhausted: false,
        }
    }

    /// `.` stands for a turn without a key; whitespace is skipped.
    pub fn parse(keys: &str) -> Self {
        Self::new(
            keys.chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| (c != '.').then(|| c.to_ascii_uppercase())),
        )
    }

    /// Sends the quit key once the sequence runs out, so headless runs end.
    pub fn quit_when_exhausted(mut self) -> Self {
        self.quit_when_exhausted = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl InputSource for ScriptedInput {
    fn poll_key(&self) -> Option<char> {
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match keys.pop_front() {
            Some(key) => key,
            None if self.quit_when_exhausted => Some(KEY_QUIT),
            None => None,
        }
    }
}
