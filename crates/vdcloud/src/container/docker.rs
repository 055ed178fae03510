//! Docker Engine API client.
//!
//! Only the handful of endpoints the sandbox lifecycle needs are covered:
//! create, start, resize and version. TCP endpoints go through reqwest;
//! unix socket endpoints through a hyper client with a unix connector.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, header};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::UnixConnector;
use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{ContainerError, ContainerResult};
use super::{ContainerRuntimeApi, CreateSpec};
use crate::endpoint::{RuntimeEndpoint, RuntimeScheme};

/// Default timeout for control requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request body for `POST /containers/create`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody<'a> {
    image: &'a str,
    cmd: &'a [String],
    tty: bool,
    open_stdin: bool,
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    host_config: HostConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    init: bool,
    auto_remove: bool,
    memory: u64,
    memory_swap: u64,
    cpu_period: u64,
    cpu_quota: u64,
    readonly_rootfs: bool,
    tmpfs: BTreeMap<String, String>,
}

impl<'a> CreateContainerBody<'a> {
    fn from_spec(spec: &'a CreateSpec) -> Self {
        let profile = &spec.profile;
        Self {
            image: &spec.image,
            cmd: &spec.command,
            tty: true,
            open_stdin: true,
            attach_stdin: false,
            attach_stdout: false,
            attach_stderr: false,
            host_config: HostConfig {
                init: true,
                auto_remove: true,
                memory: profile.memory_bytes,
                memory_swap: profile.memory_swap_bytes(),
                cpu_period: profile.cpu_period_us,
                cpu_quota: profile.cpu_quota_us,
                readonly_rootfs: profile.read_only_root,
                tmpfs: profile.tmpfs_options(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "ApiVersion", default)]
    api_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Extract the runtime's explanation from an error body.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        })
}

/// How requests reach the daemon.
#[derive(Clone)]
enum Transport {
    Tcp {
        client: reqwest::Client,
        base_url: String,
    },
    Unix {
        client: Client<UnixConnector, Full<Bytes>>,
        socket_path: PathBuf,
    },
}

/// Container runtime backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    transport: Transport,
    endpoint: RuntimeEndpoint,
    api_version: String,
    timeout: Duration,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("endpoint", &self.endpoint.to_string())
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl DockerRuntime {
    /// Create a client for `endpoint`.
    pub fn new(
        endpoint: RuntimeEndpoint,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> ContainerResult<Self> {
        let transport = match (endpoint.scheme(), endpoint.socket_path()) {
            (RuntimeScheme::LocalSocket, Some(path)) => Transport::Unix {
                client: Client::builder(TokioExecutor::new()).build(UnixConnector),
                socket_path: path.to_path_buf(),
            },
            (RuntimeScheme::LocalSocket, None) => {
                return Err(ContainerError::InvalidInput(
                    "local socket endpoint without a socket path".to_string(),
                ));
            }
            _ => {
                let client = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| ContainerError::InvalidInput(e.to_string()))?;
                Transport::Tcp {
                    client,
                    base_url: endpoint.http_base_url(),
                }
            }
        };

        Ok(Self {
            transport,
            endpoint,
            api_version: api_version.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    fn unavailable(&self, message: impl ToString) -> ContainerError {
        ContainerError::Unavailable {
            endpoint: self.endpoint.to_string(),
            message: message.to_string(),
        }
    }

    /// Send one request and collect the whole response body.
    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> ContainerResult<(StatusCode, Bytes)> {
        let path = format!("/{}{}", self.api_version, path_and_query);
        debug!("docker {} {}", method, path);

        match &self.transport {
            Transport::Tcp { client, base_url } => {
                let mut builder = client.request(method, format!("{base_url}{path}"));
                if let Some(body) = body {
                    builder = builder
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(body);
                }
                let response = builder.send().await.map_err(|e| self.unavailable(e))?;
                let status = response.status();
                let bytes = response.bytes().await.map_err(|e| self.unavailable(e))?;
                Ok((status, bytes))
            }
            Transport::Unix {
                client,
                socket_path,
            } => {
                let uri: hyper::Uri = hyperlocal::Uri::new(socket_path, &path).into();
                let has_body = body.is_some();
                let mut builder = Request::builder().method(method).uri(uri);
                if has_body {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                }
                let request = builder
                    .body(Full::new(Bytes::from(body.unwrap_or_default())))
                    .map_err(|e| ContainerError::InvalidInput(e.to_string()))?;

                let exchange = async {
                    let response = client.request(request).await.map_err(|e| self.unavailable(e))?;
                    let status = response.status();
                    let bytes = response
                        .into_body()
                        .collect()
                        .await
                        .map_err(|e| self.unavailable(e))?
                        .to_bytes();
                    Ok::<_, ContainerError>((status, bytes))
                };

                tokio::time::timeout(self.timeout, exchange)
                    .await
                    .map_err(|_| self.unavailable(format!("request timed out after {:?}", self.timeout)))?
            }
        }
    }

    /// Create a sandbox from `spec`.
    pub async fn create_container(&self, spec: &CreateSpec) -> ContainerResult<String> {
        let body = serde_json::to_vec(&CreateContainerBody::from_spec(spec))
            .map_err(|e| ContainerError::InvalidInput(e.to_string()))?;

        let (status, bytes) = self
            .request(Method::POST, "/containers/create", Some(body))
            .await?;

        match status {
            StatusCode::CREATED | StatusCode::OK => {
                let created: CreateContainerResponse = serde_json::from_slice(&bytes)
                    .map_err(|e| ContainerError::ParseError(e.to_string()))?;
                for warning in created.warnings.unwrap_or_default() {
                    debug!("docker create warning for {}: {}", created.id, warning);
                }
                Ok(created.id)
            }
            StatusCode::NOT_FOUND => Err(ContainerError::ImageNotFound(error_message(status, &bytes))),
            _ => Err(ContainerError::Api {
                operation: "create",
                status: status.as_u16(),
                message: error_message(status, &bytes),
            }),
        }
    }

    /// Start a created sandbox.
    pub async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        let (status, bytes) = self
            .request(Method::POST, &format!("/containers/{container_id}/start"), None)
            .await?;

        match status {
            // 304: already started
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(ContainerError::ContainerNotFound(error_message(status, &bytes))),
            _ => Err(ContainerError::Api {
                operation: "start",
                status: status.as_u16(),
                message: error_message(status, &bytes),
            }),
        }
    }

    /// Resize the sandbox TTY.
    pub async fn resize_tty(&self, container_id: &str, rows: u16, cols: u16) -> ContainerResult<()> {
        let (status, bytes) = self
            .request(
                Method::POST,
                &format!("/containers/{container_id}/resize?h={rows}&w={cols}"),
                None,
            )
            .await?;

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ContainerError::ContainerNotFound(error_message(status, &bytes))),
            _ => Err(ContainerError::Api {
                operation: "resize",
                status: status.as_u16(),
                message: error_message(status, &bytes),
            }),
        }
    }

    /// Daemon version (`Version` field of `GET /version`).
    pub async fn version(&self) -> ContainerResult<String> {
        let (status, bytes) = self.request(Method::GET, "/version", None).await?;
        if !status.is_success() {
            return Err(ContainerError::Api {
                operation: "version",
                status: status.as_u16(),
                message: error_message(status, &bytes),
            });
        }
        let version: VersionResponse =
            serde_json::from_slice(&bytes).map_err(|e| ContainerError::ParseError(e.to_string()))?;
        match version.api_version {
            Some(api) => Ok(format!("{} (api {})", version.version, api)),
            None => Ok(version.version),
        }
    }
}

#[async_trait]
impl ContainerRuntimeApi for DockerRuntime {
    async fn create_container(&self, spec: &CreateSpec) -> ContainerResult<String> {
        self.create_container(spec).await
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.start_container(container_id).await
    }

    async fn resize_tty(&self, container_id: &str, rows: u16, cols: u16) -> ContainerResult<()> {
        self.resize_tty(container_id, rows, cols).await
    }

    async fn version(&self) -> ContainerResult<String> {
        self.version().await
    }
}
