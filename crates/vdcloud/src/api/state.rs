//! Application state shared across handlers.

use std::sync::Arc;

use crate::attach::AttachProxy;
use crate::profile::ResourceProfile;
use crate::session::SessionManager;

/// Explicitly constructed dependencies of every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub proxy: Arc<AttachProxy>,
    /// Applied to every created sandbox.
    pub profile: Arc<ResourceProfile>,
}

impl AppState {
    pub fn new(sessions: SessionManager, proxy: AttachProxy, profile: ResourceProfile) -> Self {
        Self {
            sessions: Arc::new(sessions),
            proxy: Arc::new(proxy),
            profile: Arc::new(profile),
        }
    }
}
