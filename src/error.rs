//! Errors surfaced by the level loader, the turn gates and checkpointing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid level {level}: {reason}")]
    InvalidLevel { level: usize, reason: String },

    #[error("no level files found in {0}")]
    NoLevels(String),

    #[error("turn gate closed while waiting")]
    GateClosed,

    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),
}

impl GameError {
    pub fn invalid_level(level: usize, reason: impl Into<String>) -> Self {
        Self::InvalidLevel {
            level,
            reason: reason.into(),
        }
    }
}

impl From<tokio::sync::AcquireError> for GameError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        Self::GateClosed
    }
}

pub type Result<T> = std::result::Result<T, GameError>;
