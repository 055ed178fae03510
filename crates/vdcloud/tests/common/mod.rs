//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use vdcloud::api::{self, AppState};
use vdcloud::attach::AttachProxy;
use vdcloud::container::{ContainerError, ContainerResult, ContainerRuntimeApi, CreateSpec};
use vdcloud::endpoint::{AddressResolver, RuntimeEndpoint};
use vdcloud::profile::ResourceProfile;
use vdcloud::session::{SessionManager, SessionManagerConfig};

/// A runtime call as seen by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { image: String, memory: u64 },
    Start(String),
    Resize(String, u16, u16),
}

/// In-process stand-in for the container runtime that records every call.
#[derive(Default)]
pub struct FakeRuntime {
    ids: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Call>>,
    gone: Mutex<Vec<String>>,
    unavailable: Mutex<bool>,
}

impl FakeRuntime {
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulate the sandbox exiting and being auto-removed.
    pub fn remove(&self, id: &str) {
        self.gone.lock().unwrap().push(id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check(&self, id: &str) -> ContainerResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(ContainerError::Unavailable {
                endpoint: "unix:///var/run/docker.sock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        if self.gone.lock().unwrap().iter().any(|g| g == id) {
            return Err(ContainerError::ContainerNotFound(format!(
                "No such container: {id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeRuntime {
    async fn create_container(&self, spec: &CreateSpec) -> ContainerResult<String> {
        self.calls.lock().unwrap().push(Call::Create {
            image: spec.image.clone(),
            memory: spec.profile.memory_bytes,
        });
        if *self.unavailable.lock().unwrap() {
            return Err(ContainerError::Unavailable {
                endpoint: "unix:///var/run/docker.sock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ContainerError::ParseError("no ids left".to_string()))
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Start(container_id.to_string()));
        self.check(container_id)
    }

    async fn resize_tty(&self, container_id: &str, rows: u16, cols: u16) -> ContainerResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Resize(container_id.to_string(), rows, cols));
        self.check(container_id)
    }

    async fn version(&self) -> ContainerResult<String> {
        Ok("fake".to_string())
    }
}

/// Create a test application backed by `runtime`, attaching through `endpoint`.
pub fn test_app_with(runtime: Arc<FakeRuntime>, endpoint: RuntimeEndpoint) -> Router {
    let sessions = SessionManager::new(runtime, SessionManagerConfig::default());
    let resolver = AddressResolver::new(endpoint, "v1.40").unwrap();
    let proxy = AttachProxy::new(resolver, Duration::from_secs(2));
    let state = AppState::new(sessions, proxy, ResourceProfile::default());
    api::create_router(state)
}

/// Create a test application whose runtime issues `ids` in order.
pub fn test_app(ids: &[&str]) -> (Router, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::with_ids(ids));
    let app = test_app_with(runtime.clone(), RuntimeEndpoint::default());
    (app, runtime)
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
