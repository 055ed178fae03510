//! Runtime endpoint parsing and attach address resolution.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ConfigError;
use crate::container::ContainerId;

/// Socket used when no endpoint is configured.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Host used in URLs when the endpoint has none (local sockets).
pub const DEFAULT_HOST: &str = "localhost";

/// Engine API version prefix used for every request.
pub const DEFAULT_API_VERSION: &str = "v1.40";

static API_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v[0-9]+\.[0-9]+$").expect("static regex is valid"));

/// Transport scheme of the runtime control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeScheme {
    /// Plain HTTP over TCP.
    Plain,
    /// HTTPS over TCP.
    Secure,
    /// HTTP over a local unix socket.
    LocalSocket,
}

impl RuntimeScheme {
    /// HTTP scheme for control requests.
    pub fn http_scheme(self) -> &'static str {
        match self {
            Self::Plain | Self::LocalSocket => "http",
            Self::Secure => "https",
        }
    }

    /// Streaming scheme for the attach channel.
    pub fn ws_scheme(self) -> &'static str {
        match self {
            Self::Plain | Self::LocalSocket => "ws",
            Self::Secure => "wss",
        }
    }
}

/// Where the container runtime listens. Parsed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    scheme: RuntimeScheme,
    /// `host[:port]` for TCP endpoints.
    authority: Option<String>,
    /// Socket path for local-socket endpoints.
    socket_path: Option<PathBuf>,
}

impl Default for RuntimeEndpoint {
    fn default() -> Self {
        Self::local_socket(DEFAULT_DOCKER_SOCKET)
    }
}

impl RuntimeEndpoint {
    /// Endpoint on a local unix socket.
    pub fn local_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: RuntimeScheme::LocalSocket,
            authority: None,
            socket_path: Some(path.into()),
        }
    }

    /// Parse a `DOCKER_HOST`-style value.
    ///
    /// Accepted forms: `unix:///path`, `http+unix:///path`, `tcp://host[:port]`,
    /// `http://host[:port]`, `https://host[:port]` and bare `host[:port]`.
    /// `tcp://` becomes secure when `tls` is set. An empty value selects the
    /// default local socket. Any other scheme is a configuration error.
    pub fn parse(value: &str, tls: bool) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }

        let (scheme, rest) = match value.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("tcp".to_string(), value),
        };

        match scheme.as_str() {
            "unix" | "http+unix" => {
                if !rest.starts_with('/') {
                    return Err(ConfigError::InvalidEndpoint(format!(
                        "socket path must be absolute: {value}"
                    )));
                }
                Ok(Self::local_socket(rest))
            }
            "tcp" | "http" | "https" => {
                let secure = scheme == "https" || (scheme == "tcp" && tls);
                let authority = rest.trim_end_matches('/');
                if authority.contains('/') {
                    return Err(ConfigError::InvalidEndpoint(format!(
                        "endpoint must not contain a path: {value}"
                    )));
                }
                Ok(Self {
                    scheme: if secure {
                        RuntimeScheme::Secure
                    } else {
                        RuntimeScheme::Plain
                    },
                    authority: normalize_authority(authority, secure)?,
                    socket_path: None,
                })
            }
            _ => Err(ConfigError::UnsupportedScheme {
                value: value.to_string(),
                scheme,
            }),
        }
    }

    pub fn scheme(&self) -> RuntimeScheme {
        self.scheme
    }

    /// `host[:port]`, if any.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Host used in request URLs; local sockets fall back to [`DEFAULT_HOST`].
    pub fn host_or_default(&self) -> &str {
        self.authority.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Base URL for control requests over TCP (`http[s]://host:port`).
    pub fn http_base_url(&self) -> String {
        format!("{}://{}", self.scheme.http_scheme(), self.host_or_default())
    }
}

/// Fill in Docker's conventional ports when the authority omits one.
fn normalize_authority(authority: &str, secure: bool) -> Result<Option<String>, ConfigError> {
    if authority.is_empty() || authority.starts_with(':') {
        let port = authority.trim_start_matches(':');
        if port.is_empty() {
            return Ok(None);
        }
        return Ok(Some(format!("{DEFAULT_HOST}:{}", parse_port(port)?)));
    }

    // Bracketed IPv6 literals keep their colons inside the brackets.
    let port_sep = if authority.starts_with('[') {
        authority.rfind("]:").map(|i| i + 1)
    } else {
        authority.rfind(':')
    };

    match port_sep {
        Some(idx) => {
            let port = parse_port(&authority[idx + 1..])?;
            Ok(Some(format!("{}:{}", &authority[..idx], port)))
        }
        None => {
            let port = if secure { 2376 } else { 2375 };
            Ok(Some(format!("{authority}:{port}")))
        }
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse::<u16>()
        .map_err(|_| ConfigError::InvalidEndpoint(format!("invalid port: {port:?}")))
}

impl fmt::Display for RuntimeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scheme, &self.socket_path) {
            (RuntimeScheme::LocalSocket, Some(path)) => write!(f, "unix://{}", path.display()),
            _ => f.write_str(&self.http_base_url()),
        }
    }
}

/// Connection target for one attach channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    /// `ws://` or `wss://` URL of the runtime attach route.
    pub url: String,
    /// Unix socket to dial instead of resolving the URL's host.
    pub socket_path: Option<PathBuf>,
}

/// Computes runtime attach URLs for sessions.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    endpoint: RuntimeEndpoint,
    api_version: String,
}

impl AddressResolver {
    pub fn new(endpoint: RuntimeEndpoint, api_version: impl Into<String>) -> Result<Self, ConfigError> {
        let api_version = api_version.into();
        if !API_VERSION.is_match(&api_version) {
            return Err(ConfigError::InvalidApiVersion(api_version));
        }
        Ok(Self {
            endpoint,
            api_version,
        })
    }

    pub fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Attach target for `id`. `query` is appended verbatim.
    pub fn attach_target(&self, id: &ContainerId, query: Option<&str>) -> AttachTarget {
        let mut url = format!(
            "{}://{}/{}/containers/{}/attach/ws",
            self.endpoint.scheme().ws_scheme(),
            self.endpoint.host_or_default(),
            self.api_version,
            id
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        AttachTarget {
            url,
            socket_path: self.endpoint.socket_path().map(Path::to_path_buf),
        }
    }
}
