use std::fmt;

use serde::Serialize;

use crate::constants::{KEY_CHARGE, KEY_CHECKPOINT, KEY_QUIT, KEY_RANDOM, KEY_WAIT};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Vec2 {
    pub x: i32,
    pub y: i32,
}

impl Vec2 {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dir: Direction) -> Self {
        match dir {
            Direction::Up => Self::new(self.x, self.y - 1),
            Direction::Down => Self::new(self.x, self.y + 1),
            Direction::Left => Self::new(self.x - 1, self.y),
            Direction::Right => Self::new(self.x + 1, self.y),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_uppercase() {
            'W' => Some(Self::Up),
            'S' => Some(Self::Down),
            'A' => Some(Self::Left),
            'D' => Some(Self::Right),
            _ => None,
        }
    }

    pub fn key(self) -> char {
        match self {
            Self::Up => 'W',
            Self::Down => 'S',
            Self::Left => 'A',
            Self::Right => 'D',
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupant {
    #[default]
    Empty,
    Wall,
    Pacman,
    Ghost,
}

/// What one command or key asks an actor to do this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Move(Direction),
    Random,
    Wait,
    Charge,
    Checkpoint,
    Quit,
    /// No key was pressed.
    Idle,
    Unknown(char),
}

impl Action {
    /// Maps a key from the input source. Only the player reads keys.
    pub fn from_key(key: Option<char>) -> Self {
        let Some(key) = key else {
            return Self::Idle;
        };
        let key = key.to_ascii_uppercase();
        if let Some(dir) = Direction::from_key(key) {
            return Self::Move(dir);
        }
        match key {
            KEY_RANDOM => Self::Random,
            KEY_CHECKPOINT => Self::Checkpoint,
            KEY_QUIT => Self::Quit,
            other => Self::Unknown(other),
        }
    }

    /// Maps the first letter of a script command line.
    pub fn from_script(token: char) -> Self {
        let token = token.to_ascii_uppercase();
        if let Some(dir) = Direction::from_key(token) {
            return Self::Move(dir);
        }
        match token {
            KEY_RANDOM => Self::Random,
            KEY_WAIT => Self::Wait,
            KEY_CHARGE => Self::Charge,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    /// Repeat count for `Wait`; 1 for everything else.
    pub turns: u32,
    pub turns_left: u32,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            turns: 1,
            turns_left: 1,
        }
    }

    pub fn wait(turns: u32) -> Self {
        let turns = turns.max(1);
        Self {
            action: Action::Wait,
            turns,
            turns_left: turns,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    #[default]
    Continue,
    ReachedPortal,
    PacmanDied,
    QuitRequested,
    CheckpointRequested,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelOutcome {
    #[default]
    Continue,
    NextLevel,
    Quit,
    ForcedQuit,
    BranchWon,
}

impl LevelOutcome {
    pub fn is_continue(self) -> bool {
        self == Self::Continue
    }

    /// Outcome a checkpoint branch reports back to the timeline that forked it.
    /// Dying inside the branch rewinds the original to the checkpoint.
    pub fn branch_exit(self, cleared_all: bool) -> Self {
        match self {
            Self::Quit => Self::Continue,
            Self::NextLevel if cleared_all => Self::BranchWon,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Menu,
    Win,
    GameOver,
}

/// Result of one movement attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// No movement was attempted (wait, charge, idle, malformed command).
    Stayed,
    Moved,
    /// Wall, same-kind occupant or the grid edge.
    Rejected,
    ReachedPortal,
    PacmanKilled,
}

impl Step {
    pub fn play_outcome(self) -> Option<PlayOutcome> {
        match self {
            Self::ReachedPortal => Some(PlayOutcome::ReachedPortal),
            Self::PacmanKilled => Some(PlayOutcome::PacmanDied),
            _ => None,
        }
    }
}

pub const GLYPH_WALL: char = 'X';
pub const GLYPH_DOT: char = 'o';
pub const GLYPH_PORTAL: char = '@';
pub const GLYPH_PACMAN: char = 'C';
pub const GLYPH_GHOST: char = 'M';
pub const GLYPH_EMPTY: char = ' ';

/// Render-ready image of a level, taken while every actor is parked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub level: usize,
    pub width: i32,
    pub height: i32,
    pub rows: Vec<String>,
    pub score: u32,
    pub alive: bool,
    pub branch: bool,
}

impl Frame {
    pub fn count(&self, glyph: char) -> usize {
        self.rows
            .iter()
            .map(|row| row.chars().filter(|c| *c == glyph).count())
            .sum()
    }

    pub fn glyph_at(&self, pos: Vec2) -> Option<char> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        self.rows.get(pos.y as usize)?.chars().nth(pos.x as usize)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== level {} ({}x{}) score={} alive={} branch={} ===",
            self.level, self.width, self.height, self.score, self.alive, self.branch
        )?;
        for row in &self.rows {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(Action::from_key(Some('w')), Action::Move(Direction::Up));
        assert_eq!(Action::from_key(Some('g')), Action::Checkpoint);
        assert_eq!(Action::from_key(Some('q')), Action::Quit);
        assert_eq!(Action::from_key(None), Action::Idle);
        assert_eq!(Action::from_key(Some('z')), Action::Unknown('Z'));
    }

    #[test]
    fn script_tokens_do_not_include_control_keys() {
        assert_eq!(Action::from_script('C'), Action::Charge);
        assert_eq!(Action::from_script('T'), Action::Wait);
        assert_eq!(Action::from_script('G'), Action::Unknown('G'));
        assert_eq!(Action::from_script('Q'), Action::Unknown('Q'));
    }

    #[test]
    fn branch_exit_rewinds_on_death_and_reports_final_win() {
        assert_eq!(LevelOutcome::Quit.branch_exit(false), LevelOutcome::Continue);
        assert_eq!(LevelOutcome::NextLevel.branch_exit(true), LevelOutcome::BranchWon);
        assert_eq!(LevelOutcome::NextLevel.branch_exit(false), LevelOutcome::NextLevel);
        assert_eq!(
            LevelOutcome::ForcedQuit.branch_exit(true),
            LevelOutcome::ForcedQuit
        );
    }

    #[test]
    fn wait_command_never_has_zero_turns() {
        let cmd = Command::wait(0);
        assert_eq!(cmd.turns, 1);
        assert_eq!(cmd.turns_left, 1);
    }
}
