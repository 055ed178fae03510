//! Sandbox session lifecycle.
//!
//! A session is one sandbox container. The manager creates, starts and
//! resizes sessions through the container runtime and remembers which
//! identifiers it issued.

mod error;
mod models;
mod service;

pub use error::{SessionError, SessionResult};
pub use models::{Session, SessionState};
pub use service::{DEFAULT_SESSION_IDLE_TTL, SessionManager, SessionManagerConfig};
