//! crossterm front end: full-screen board drawing and non-blocking keys.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{ExecutableCommand, QueueableCommand};
use tracing::warn;

use crate::constants::{KEY_CHECKPOINT, KEY_QUIT, KEY_RANDOM};
use crate::frontend::{InputSource, Renderer};
use crate::types::{
    Direction, DisplayMode, Frame, GLYPH_DOT, GLYPH_GHOST, GLYPH_PACMAN, GLYPH_PORTAL, GLYPH_WALL,
};

/// Raw mode plus alternate screen for as long as the guard lives.
pub struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(Hide)?;
        Ok(Self { stdout })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = self.stdout.execute(Show);
        let _ = self.stdout.execute(LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    fn draw(&self, frame: &Frame, mode: DisplayMode) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.queue(MoveTo(0, 0))?;
        stdout.queue(Clear(ClearType::All))?;

        let banner = match mode {
            DisplayMode::Menu => format!("Level {}", frame.level),
            DisplayMode::Win => format!("Level {} cleared!", frame.level),
            DisplayMode::GameOver => "Game over".to_string(),
        };
        stdout.queue(SetForegroundColor(Color::White))?;
        stdout.queue(Print(format!(
            "{banner}   score {}{}",
            frame.score,
            if frame.branch { "   [checkpoint]" } else { "" }
        )))?;

        for (y, row) in frame.rows.iter().enumerate() {
            stdout.queue(MoveTo(0, y as u16 + 2))?;
            for glyph in row.chars() {
                stdout.queue(SetForegroundColor(glyph_color(glyph)))?;
                stdout.queue(Print(glyph))?;
            }
        }

        let footer = frame.rows.len() as u16 + 3;
        stdout.queue(MoveTo(0, footer))?;
        stdout.queue(SetForegroundColor(Color::DarkGrey))?;
        stdout.queue(Print("WASD move  R random  G checkpoint  Q quit"))?;
        stdout.queue(ResetColor)?;
        stdout.flush()
    }
}

fn glyph_color(glyph: char) -> Color {
    match glyph {
        GLYPH_WALL => Color::Blue,
        GLYPH_PACMAN => Color::Yellow,
        GLYPH_GHOST => Color::Red,
        GLYPH_PORTAL => Color::Green,
        GLYPH_DOT => Color::White,
        _ => Color::Reset,
    }
}

impl Renderer for TerminalRenderer {
    fn render(&self, frame: &Frame, mode: DisplayMode) {
        if let Err(err) = self.draw(frame, mode) {
            warn!(%err, "terminal render failed");
        }
    }
}

/// Drains pending key events and keeps the last one the game understands.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyboardInput;

impl KeyboardInput {
    fn drain(&self) -> io::Result<Option<char>> {
        let mut last = None;
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Some(mapped) = map_key(key.code) {
                last = Some(mapped);
            }
        }
        Ok(last)
    }
}

pub fn map_key(code: KeyCode) -> Option<char> {
    let key = match code {
        KeyCode::Up => Direction::Up.key(),
        KeyCode::Down => Direction::Down.key(),
        KeyCode::Left => Direction::Left.key(),
        KeyCode::Right => Direction::Right.key(),
        KeyCode::Esc => KEY_QUIT,
        KeyCode::Char(c) => c.to_ascii_uppercase(),
        _ => return None,
    };
    let known = Direction::from_key(key).is_some()
        || matches!(key, KEY_RANDOM | KEY_CHECKPOINT | KEY_QUIT);
    known.then_some(key)
}

impl InputSource for KeyboardInput {
    fn poll_key(&self) -> Option<char> {
        match self.drain() {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, "keyboard poll failed");
                None
            }
        }
    }
}
