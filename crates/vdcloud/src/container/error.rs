//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime does not know the container. Carries the runtime's explanation.
    #[error("{0}")]
    ContainerNotFound(String),

    /// The image to create from does not exist.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The runtime answered with an unexpected status.
    #[error("container {operation} failed ({status}): {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The runtime could not be reached at all.
    #[error("container runtime unavailable at {endpoint}: {message}")]
    Unavailable { endpoint: String, message: String },

    /// Failed to parse a runtime response.
    #[error("failed to parse runtime response: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ContainerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_))
    }
}
