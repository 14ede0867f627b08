//! Error types for show definitions and engine operations
use crate::show::{CueId, ShowId, TrackId, TriggerId};
use thiserror::Error;

/// Show engine errors
#[derive(Error, Debug)]
pub enum ShowError {
    /// Beat range with `end <= start`
    #[error("Invalid beat range [{start}, {end}): end must be greater than start")]
    InvalidRange { start: u32, end: u32 },

    /// Weight outside `1..=1000`
    #[error("Invalid weight {0}: must be between 1 and 1000")]
    InvalidWeight(u32),

    /// Phrase trigger section layout rejected
    #[error("Invalid section layout: {0}")]
    InvalidLayout(String),

    /// Cue message with out-of-range channel or number
    #[error("Invalid cue message: {0}")]
    InvalidMessage(String),

    /// Cue does not fit on the phrase trigger canvas
    #[error("Cue {cue} [{start}, {end}) lies outside the canvas of trigger {trigger}")]
    CueOutsideCanvas {
        trigger: TriggerId,
        cue: CueId,
        start: u32,
        end: u32,
    },

    #[error("Show not found: {0}")]
    ShowNotFound(ShowId),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Phrase trigger not found: {0}")]
    TriggerNotFound(TriggerId),

    #[error("Cue not found: {0}")]
    CueNotFound(CueId),

    /// Identifier already in use
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for show operations
pub type Result<T> = std::result::Result<T, ShowError>;
