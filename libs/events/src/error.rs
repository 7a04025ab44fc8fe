//! Error types for trigger handling.

use thiserror::Error;

/// Errors that can occur when handling triggers.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The trigger kind is unknown.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
