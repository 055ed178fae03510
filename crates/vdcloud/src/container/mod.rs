//! Container runtime access.
//!
//! Sandboxes are containers managed through the Docker Engine HTTP API. The
//! [`ContainerRuntimeApi`] trait is the seam the session layer talks to, so
//! tests can substitute a fake runtime.

mod docker;
mod error;
mod id;

pub use docker::{DEFAULT_REQUEST_TIMEOUT, DockerRuntime};
pub use error::{ContainerError, ContainerResult};
pub use id::ContainerId;

use async_trait::async_trait;

use crate::profile::ResourceProfile;

/// Everything the runtime needs to create one sandbox.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    /// Image to run.
    pub image: String,
    /// Arguments passed to the image entrypoint.
    pub command: Vec<String>,
    /// Resource constraints.
    pub profile: ResourceProfile,
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create a sandbox (auto-removed on exit, TTY with open stdin). Returns the runtime id.
    async fn create_container(&self, spec: &CreateSpec) -> ContainerResult<String>;

    /// Start a created sandbox. Starting an already running one succeeds.
    async fn start_container(&self, container_id: &str) -> ContainerResult<()>;

    /// Resize the sandbox's pseudo-terminal.
    async fn resize_tty(&self, container_id: &str, rows: u16, cols: u16) -> ContainerResult<()>;

    /// Runtime version string, used as a health check.
    async fn version(&self) -> ContainerResult<String>;
}
