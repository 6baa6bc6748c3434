//! Error types for the decoding engine
//!
//! Two layers: [`SessionError`] is fatal and stops a session before any
//! sample is processed, [`WorkError`] is the outcome of a single decode step.
//! Protocol-level problems (bad framing, checksum mismatch) are not errors at
//! all from the engine's point of view; decoders annotate them and resync.

use crate::CaptureError;

/// Fatal, session-level configuration errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Decoder '{decoder}': required channel '{channel}' is not bound")]
    MissingChannel { decoder: String, channel: String },

    #[error("Decoder '{decoder}' has no channel named '{channel}'")]
    UnknownChannel { decoder: String, channel: String },

    #[error("Channel '{channel}' mapped to line {line}, but the capture has {available} lines")]
    ChannelOutOfRange {
        channel: String,
        line: usize,
        available: usize,
    },

    #[error("Channels '{first}' and '{second}' are both mapped to line {line}")]
    DuplicateBinding {
        first: String,
        second: String,
        line: usize,
    },

    #[error("Decoder '{0}' cannot decode without a sample rate")]
    MissingSamplerate(String),

    #[error("Decoder '{decoder}' has no option '{option}'")]
    UnknownOption { decoder: String, option: String },

    #[error("Option '{option}' of decoder '{decoder}': value {value} is not one of [{allowed}]")]
    InvalidOption {
        decoder: String,
        option: String,
        value: String,
        allowed: String,
    },

    #[error("Option '{option}' of decoder '{decoder}': expected {expected}, got '{value}'")]
    OptionType {
        decoder: String,
        option: String,
        expected: &'static str,
        value: String,
    },

    #[error("Option '{option}' of decoder '{decoder}': {reason}")]
    OptionRange {
        decoder: String,
        option: String,
        reason: String,
    },

    #[error("Output stream '{0}' registered twice")]
    DuplicateStream(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Decoder contract violation: {0}")]
    Contract(String),
}

/// Outcome of a single decode step
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// No further samples or packets exist. This is how every decode loop ends.
    #[error("End of stream")]
    EndOfStream,

    /// The decoder used the engine in a way that can never be satisfied
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl WorkError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, WorkError::EndOfStream)
    }
}

/// Result type for decode steps
pub type WorkResult<T = ()> = Result<T, WorkError>;
