//! Application configuration.
//!
//! Layers, lowest precedence first: built-in defaults, the TOML config file,
//! `VDCLOUD__*` environment variables, then the legacy `VISIDATA_IMAGE` and
//! `DOCKER_HOST` variables. `DOCKER_TLS_VERIFY` is recognised only to refuse
//! it: client certificate authentication is not supported.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attach::DEFAULT_CONNECT_TIMEOUT;
use crate::container::DEFAULT_REQUEST_TIMEOUT;
use crate::endpoint::{AddressResolver, DEFAULT_API_VERSION, RuntimeEndpoint};
use crate::profile::ResourceProfile;
use crate::session::DEFAULT_SESSION_IDLE_TTL;

pub const APP_NAME: &str = "vdcloud";

/// Image used when nothing else is configured.
pub const DEFAULT_IMAGE: &str = "visidata";

/// Legacy variable selecting the sandbox image.
pub const IMAGE_ENV: &str = "VISIDATA_IMAGE";

/// Standard variable selecting the runtime endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Standard variable requesting mutual TLS with `DOCKER_CERT_PATH` certificates.
pub const DOCKER_TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("runtime endpoint {value:?} uses an unsupported scheme {scheme:?}")]
    UnsupportedScheme { value: String, scheme: String },

    #[error("invalid runtime endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid runtime api version {0:?} (expected e.g. v1.40)")]
    InvalidApiVersion(String),

    #[error("invalid resource profile: {0}")]
    InvalidProfile(String),

    #[error("DOCKER_TLS_VERIFY is set but client certificates are not supported")]
    ClientCertificatesUnsupported,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub profile: ResourceProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime endpoint in DOCKER_HOST syntax. Empty means the local socket.
    #[serde(default)]
    pub endpoint: String,
    /// Use TLS for `tcp://` endpoints. The server certificate is checked
    /// against the webpki roots; no client certificate is presented.
    #[serde(default)]
    pub tls: bool,
    /// Set from `DOCKER_TLS_VERIFY`. Rejected by [`AppConfig::validate`].
    #[serde(skip)]
    pub tls_verify: bool,
    /// Engine API version prefix.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Sandbox image.
    #[serde(default = "default_image")]
    pub image: String,
    /// Arguments for the image entrypoint.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Timeout for control requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for establishing an attach connection, in seconds.
    #[serde(default = "default_attach_timeout_secs")]
    pub attach_timeout_secs: u64,
    /// Sessions unused for this many seconds are forgotten.
    #[serde(default = "default_session_idle_ttl_secs")]
    pub session_idle_ttl_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            tls: false,
            tls_verify: false,
            api_version: default_api_version(),
            image: default_image(),
            command: default_command(),
            request_timeout_secs: default_request_timeout_secs(),
            attach_timeout_secs: default_attach_timeout_secs(),
            session_idle_ttl_secs: default_session_idle_ttl_secs(),
        }
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_command() -> Vec<String> {
    vec!["--quitguard".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_attach_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_session_idle_ttl_secs() -> u64 {
    DEFAULT_SESSION_IDLE_TTL.as_secs()
}

impl RuntimeConfig {
    /// Parse the endpoint. Unsupported schemes fail here, before serving.
    pub fn endpoint(&self) -> Result<RuntimeEndpoint, ConfigError> {
        RuntimeEndpoint::parse(&self.endpoint, self.tls)
    }

    pub fn resolver(&self) -> Result<AddressResolver, ConfigError> {
        AddressResolver::new(self.endpoint()?, self.api_version.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs.max(1))
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs.max(1))
    }
}

impl AppConfig {
    /// Validate everything that must hold before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.tls_verify {
            return Err(ConfigError::ClientCertificatesUnsupported);
        }
        self.runtime.resolver()?;
        self.profile.validate()?;
        if self.runtime.image.trim().is_empty() {
            return Err(ConfigError::InvalidProfile("image must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply `VISIDATA_IMAGE`, `DOCKER_HOST` and `DOCKER_TLS_VERIFY` using `lookup`.
    pub fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(image) = lookup(IMAGE_ENV).filter(|v| !v.is_empty()) {
            self.runtime.image = image;
        }
        if let Some(host) = lookup(DOCKER_HOST_ENV).filter(|v| !v.is_empty()) {
            self.runtime.endpoint = host;
        }
        if lookup(DOCKER_TLS_VERIFY_ENV).is_some_and(|v| !v.is_empty() && v != "0") {
            self.runtime.tls_verify = true;
        }
    }
}

/// Load configuration from `path` (if it exists) and the environment.
pub fn load(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("reading config {}", path.display()))?;

    let mut config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    config.apply_legacy_env(|key| env::var(key).ok());

    Ok(config)
}

/// Resolve the config file path, honouring an explicit override.
pub fn config_file_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.to_string()))
        }
        None => Ok(path),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
