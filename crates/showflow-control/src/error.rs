//! Error types for the action dispatcher and MIDI output
use thiserror::Error;

/// Control system errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// Generic MIDI error
    #[error("MIDI error: {0}")]
    MidiError(String),

    /// No output port matched the configured name
    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    /// MIDI initialization error
    #[error("MIDI init error: {0}")]
    #[cfg(feature = "midi")]
    MidiInitError(#[from] midir::InitError),

    /// MIDI transmission error
    #[error("MIDI send error: {0}")]
    #[cfg(feature = "midi")]
    MidiSendError(#[from] midir::SendError),

    /// Invalid message format
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The dispatch worker is no longer running
    #[error("Dispatcher stopped")]
    DispatcherStopped,

    /// A registered action returned an error or panicked
    #[error("Action failed for {subject} {kind}: {reason}")]
    ActionFailed {
        subject: String,
        kind: String,
        reason: String,
    },

    /// A callback did not return within the time limit
    #[error("Callback {callback} for {subject} {kind} timed out after {timeout_ms} ms")]
    CallbackTimeout {
        callback: String,
        subject: String,
        kind: String,
        timeout_ms: u64,
    },

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
