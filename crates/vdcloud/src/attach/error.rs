//! Attach error types.

use thiserror::Error;

/// Result type for attach operations.
pub type AttachResult<T> = Result<T, AttachError>;

#[derive(Debug, Error)]
pub enum AttachError {
    /// The runtime's attach socket could not be opened.
    #[error("sandbox {id} unreachable: {reason}")]
    SandboxUnreachable { id: String, reason: String },

    /// A frame that is neither text nor binary payload.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Transport failure while ferrying.
    #[error("transport error: {0}")]
    Transport(String),
}

impl AttachError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AttachError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<axum::Error> for AttachError {
    fn from(err: axum::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
