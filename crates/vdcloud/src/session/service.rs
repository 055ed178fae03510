//! Session manager - drives the container lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_IMAGE;
use crate::container::{ContainerError, ContainerId, ContainerRuntimeApi, CreateSpec};
use crate::endpoint::DEFAULT_DOCKER_SOCKET;
use crate::profile::ResourceProfile;

use super::error::{SessionError, SessionResult};
use super::models::{Session, SessionState};

/// Sessions untouched for this long are forgotten.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What every sandbox runs.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Container image.
    pub image: String,
    /// Fixed entry command arguments.
    pub command: Vec<String>,
    /// Runtime endpoint, for log context.
    pub endpoint: String,
    /// Registry entries not used within this window are pruned on create.
    pub idle_ttl: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            command: vec!["--quitguard".to_string()],
            endpoint: format!("unix://{DEFAULT_DOCKER_SOCKET}"),
            idle_ttl: DEFAULT_SESSION_IDLE_TTL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: SessionState,
    last_used: Instant,
}

impl Entry {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            last_used: Instant::now(),
        }
    }
}

/// Creates, starts and resizes sandbox sessions.
///
/// Identifiers the manager did not issue never reach the runtime. The
/// registry only holds lifecycle state; sockets and terminals live elsewhere.
/// A session the runtime no longer knows is stopped and leaves the registry.
pub struct SessionManager {
    runtime: Arc<dyn ContainerRuntimeApi>,
    config: SessionManagerConfig,
    sessions: DashMap<String, Entry>,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, config: SessionManagerConfig) -> Self {
        Self {
            runtime,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn image(&self) -> &str {
        &self.config.image
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Create a sandbox constrained by `profile`.
    ///
    /// Not retried: a failed create might still have produced a container,
    /// and repeating it could produce two.
    pub async fn create(&self, profile: &ResourceProfile) -> SessionResult<ContainerId> {
        self.prune_idle();

        let spec = CreateSpec {
            image: self.config.image.clone(),
            command: self.config.command.clone(),
            profile: profile.clone(),
        };

        let raw_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(err) => {
                error!(
                    endpoint = %self.config.endpoint,
                    image = %self.config.image,
                    error = %err,
                    "container.create-failed"
                );
                return Err(err.into());
            }
        };

        let id = ContainerId::parse(raw_id.trim()).map_err(|_| {
            ContainerError::ParseError(format!("runtime returned a malformed id: {raw_id:?}"))
        })?;

        self.sessions
            .insert(id.as_str().to_string(), Entry::new(SessionState::Created));
        info!(
            container = %id,
            endpoint = %self.config.endpoint,
            image = %self.config.image,
            "container.created"
        );
        Ok(id)
    }

    /// Start the session identified by `id`.
    pub async fn start(&self, id: &ContainerId) -> SessionResult<()> {
        let (full_id, _) = self.lookup(id)?;

        match self.runtime.start_container(&full_id).await {
            Ok(()) => {
                self.touch(&full_id, Some(SessionState::Running));
                info!(
                    container = %full_id,
                    endpoint = %self.config.endpoint,
                    image = %self.config.image,
                    "container.started"
                );
                Ok(())
            }
            Err(err) => Err(self.runtime_failure(&full_id, "container.start-failed", err)),
        }
    }

    /// Resize the session's terminal to `rows` x `cols`.
    pub async fn resize(&self, id: &ContainerId, rows: u32, cols: u32) -> SessionResult<()> {
        let (Some(h), Some(w)) = (terminal_dimension(rows), terminal_dimension(cols)) else {
            return Err(SessionError::InvalidDimensions { rows, cols });
        };

        let (full_id, _) = self.lookup(id)?;

        match self.runtime.resize_tty(&full_id, h, w).await {
            Ok(()) => {
                self.touch(&full_id, None);
                info!(
                    container = %full_id,
                    endpoint = %self.config.endpoint,
                    image = %self.config.image,
                    rows = h,
                    cols = w,
                    "container.resized"
                );
                Ok(())
            }
            Err(err) => Err(self.runtime_failure(&full_id, "container.resize-failed", err)),
        }
    }

    /// Full identifier of a registered session, for attaching.
    pub fn attachable(&self, id: &ContainerId) -> SessionResult<ContainerId> {
        let (full_id, _) = self.lookup(id)?;
        self.touch(&full_id, None);
        ContainerId::parse(&full_id).map_err(SessionError::from)
    }

    /// Current snapshot of a session.
    pub fn get(&self, id: &ContainerId) -> Option<Session> {
        let (full_id, state) = self.lookup(id).ok()?;
        Some(Session {
            id: ContainerId::parse(&full_id).ok()?,
            state,
        })
    }

    /// Number of sessions in the registry.
    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    /// Resolve a possibly truncated id to exactly one issued id.
    fn lookup(&self, id: &ContainerId) -> SessionResult<(String, SessionState)> {
        if let Some(state) = self.sessions.get(id.as_str()).map(|e| e.value().state) {
            return Ok((id.as_str().to_string(), state));
        }

        let mut matches = self
            .sessions
            .iter()
            .filter(|e| id.is_prefix_of(e.key()))
            .map(|e| (e.key().clone(), e.value().state));

        match (matches.next(), matches.next()) {
            (Some(found), None) => Ok(found),
            (Some(_), Some(_)) => Err(SessionError::NotFound {
                id: id.to_string(),
                message: format!("multiple containers match id prefix {id}"),
            }),
            (None, _) => Err(SessionError::not_found(id.as_str())),
        }
    }

    fn touch(&self, full_id: &str, state: Option<SessionState>) {
        if let Some(mut entry) = self.sessions.get_mut(full_id) {
            entry.last_used = Instant::now();
            if let Some(state) = state {
                entry.state = state;
            }
        }
    }

    /// Forget sessions nobody used within the idle window. The runtime
    /// removes exited sandboxes on its own, so these are most likely gone.
    fn prune_idle(&self) {
        let ttl = self.config.idle_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.last_used.elapsed() < ttl);
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(
                pruned,
                endpoint = %self.config.endpoint,
                image = %self.config.image,
                "session.pruned"
            );
        }
    }

    /// Translate a runtime error. Not-found means the sandbox exited and was removed.
    fn runtime_failure(&self, full_id: &str, event: &'static str, err: ContainerError) -> SessionError {
        match err {
            ContainerError::ContainerNotFound(message) => {
                self.sessions.remove(full_id);
                warn!(
                    container = %full_id,
                    endpoint = %self.config.endpoint,
                    image = %self.config.image,
                    message = %message,
                    "container.gone"
                );
                SessionError::NotFound {
                    id: full_id.to_string(),
                    message,
                }
            }
            other => {
                error!(
                    container = %full_id,
                    endpoint = %self.config.endpoint,
                    image = %self.config.image,
                    error = %other,
                    "{}",
                    event
                );
                SessionError::Runtime(other)
            }
        }
    }
}

fn terminal_dimension(value: u32) -> Option<u16> {
    u16::try_from(value).ok().filter(|v| *v > 0)
}
