//! Per-actor state. Each struct is mutated by its own actor task during the
//! movement phase and read by the coordinator only while every task is parked.

use tracing::warn;

use crate::constants::MAX_MOVES;
use crate::types::{Command, Vec2};

/// Fixed command list plus a cursor that wraps around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    commands: Vec<Command>,
    cursor: usize,
}

impl Script {
    pub fn new(mut commands: Vec<Command>) -> Self {
        if commands.len() > MAX_MOVES {
            warn!(
                count = commands.len(),
                max = MAX_MOVES,
                "script too long, extra commands dropped"
            );
            commands.truncate(MAX_MOVES);
        }
        Self {
            commands,
            cursor: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn current(&self) -> Option<Command> {
        if self.commands.is_empty() {
            return None;
        }
        Some(self.commands[self.cursor])
    }

    pub fn advance(&mut self) {
        if !self.commands.is_empty() {
            self.cursor = (self.cursor + 1) % self.commands.len();
        }
    }

    /// Spends one turn of the current wait command. The cursor moves on and
    /// the repeat counter rearms once the last turn is spent.
    pub fn tick_wait(&mut self) -> bool {
        let Some(cmd) = self.commands.get_mut(self.cursor) else {
            return false;
        };
        if cmd.turns_left <= 1 {
            cmd.turns_left = cmd.turns;
            self.advance();
            true
        } else {
            cmd.turns_left -= 1;
            false
        }
    }
}

/// Move-every-Nth-turn throttle: after acting, the actor sits out `passo` turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pace {
    pub passo: u32,
    pub waiting: u32,
}

impl Pace {
    pub fn new(passo: u32) -> Self {
        Self { passo, waiting: 0 }
    }

    pub fn ready(&mut self) -> bool {
        if self.waiting > 0 {
            self.waiting -= 1;
            return false;
        }
        self.waiting = self.passo;
        true
    }
}

/// The player. Its alive flag lives on the level, since ghosts clear it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pacman {
    pub pos: Vec2,
    pub score: u32,
    pub pace: Pace,
    /// Empty when the player is driven by the input source.
    pub script: Script,
    /// Key delivered by the coordinator for the coming turn.
    pub key: Option<char>,
}

impl Pacman {
    pub fn new(pos: Vec2, passo: u32, script: Script) -> Self {
        Self {
            pos,
            score: 0,
            pace: Pace::new(passo),
            script,
            key: None,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.script.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ghost {
    pub pos: Vec2,
    pub pace: Pace,
    pub script: Script,
    /// Next directional command becomes a slide.
    pub charged: bool,
    /// Cell the last move aimed at.
    pub target: Option<Vec2>,
}

impl Ghost {
    pub fn new(pos: Vec2, passo: u32, script: Script) -> Self {
        Self {
            pos,
            pace: Pace::new(passo),
            script,
            charged: false,
            target: None,
        }
    }
}
