//! Session error types.

use thiserror::Error;

use crate::container::ContainerError;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown, stopped or malformed identifier. `message` is client-visible.
    #[error("{message}")]
    NotFound { id: String, message: String },

    /// Terminal dimensions outside `1..=65535`.
    #[error("invalid terminal size {rows}x{cols}: rows and columns must be positive")]
    InvalidDimensions { rows: u32, cols: u32 },

    /// The runtime failed for a reason other than not-found.
    #[error(transparent)]
    Runtime(#[from] ContainerError),
}

impl SessionError {
    pub fn not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        let message = format!("No such container: {id}");
        Self::NotFound { id, message }
    }
}
