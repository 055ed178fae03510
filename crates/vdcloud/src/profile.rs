//! Resource constraints applied to every sandbox.
//!
//! The defaults are the contract for a conforming deployment: 100 MiB of
//! memory with swap disabled, half a CPU, a read-only root filesystem and a
//! writable tmpfs home (plus a small cache tmpfs). All of it can be
//! overridden from the `[profile]` config section.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// CFS scheduler period in microseconds.
pub const DEFAULT_CPU_PERIOD_US: u64 = 100_000;

/// CFS quota in microseconds (half of the period, i.e. `--cpus 0.5`).
pub const DEFAULT_CPU_QUOTA_US: u64 = 50_000;

/// Memory cap in bytes (100 MiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// Writable home directory inside the sandbox.
pub const DEFAULT_HOME_PATH: &str = "/home/visidata";

/// Writable cache directory inside the sandbox.
pub const DEFAULT_CACHE_PATH: &str = "/etc/visidata/cache";

/// Numeric owner of the writable mounts.
pub const DEFAULT_MOUNT_UID: u32 = 1000;

/// Fixed constraint set for a sandbox. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Memory limit in bytes. Memory+swap is pinned to the same value.
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,

    /// CFS period in microseconds.
    #[serde(default = "default_cpu_period_us")]
    pub cpu_period_us: u64,

    /// CFS quota in microseconds.
    #[serde(default = "default_cpu_quota_us")]
    pub cpu_quota_us: u64,

    /// Mount the root filesystem read-only.
    #[serde(default = "default_true")]
    pub read_only_root: bool,

    /// Writable ephemeral mounts.
    #[serde(default = "default_tmpfs")]
    pub tmpfs: Vec<TmpfsMount>,
}

/// One writable tmpfs mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsMount {
    /// Absolute mount point inside the sandbox.
    pub path: String,
    /// Size in the runtime's size syntax (e.g. `100m`).
    pub size: String,
    /// Permission bits as octal digits (e.g. `1700`).
    #[serde(default = "default_mount_mode")]
    pub mode: String,
    /// Numeric owner.
    #[serde(default = "default_mount_uid")]
    pub uid: u32,
}

fn default_memory_bytes() -> u64 {
    DEFAULT_MEMORY_BYTES
}

fn default_cpu_period_us() -> u64 {
    DEFAULT_CPU_PERIOD_US
}

fn default_cpu_quota_us() -> u64 {
    DEFAULT_CPU_QUOTA_US
}

fn default_true() -> bool {
    true
}

fn default_mount_mode() -> String {
    "1700".to_string()
}

fn default_mount_uid() -> u32 {
    DEFAULT_MOUNT_UID
}

fn default_tmpfs() -> Vec<TmpfsMount> {
    vec![
        TmpfsMount::new(DEFAULT_HOME_PATH, "100m"),
        TmpfsMount::new(DEFAULT_CACHE_PATH, "10m"),
    ]
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            memory_bytes: default_memory_bytes(),
            cpu_period_us: default_cpu_period_us(),
            cpu_quota_us: default_cpu_quota_us(),
            read_only_root: true,
            tmpfs: default_tmpfs(),
        }
    }
}

impl TmpfsMount {
    /// A mount with the default mode and owner.
    pub fn new(path: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: size.into(),
            mode: default_mount_mode(),
            uid: default_mount_uid(),
        }
    }

    /// Mount options in tmpfs syntax.
    pub fn options(&self) -> String {
        format!("rw,size={},mode={},uid={}", self.size, self.mode, self.uid)
    }
}

impl ResourceProfile {
    /// Memory+swap limit. Always equal to the memory limit so swap stays off.
    pub fn memory_swap_bytes(&self) -> u64 {
        self.memory_bytes
    }

    /// Effective CPU share (quota / period).
    pub fn cpus(&self) -> f64 {
        self.cpu_quota_us as f64 / self.cpu_period_us as f64
    }

    /// Tmpfs mounts keyed by path, as the runtime expects them.
    pub fn tmpfs_options(&self) -> BTreeMap<String, String> {
        self.tmpfs
            .iter()
            .map(|mount| (mount.path.clone(), mount.options()))
            .collect()
    }

    /// Check the profile against the runtime's accepted ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Docker refuses memory limits below 6 MiB.
        if self.memory_bytes < 6 * 1024 * 1024 {
            return Err(ConfigError::InvalidProfile(format!(
                "memory_bytes must be at least 6 MiB, got {}",
                self.memory_bytes
            )));
        }

        if !(1_000..=1_000_000).contains(&self.cpu_period_us) {
            return Err(ConfigError::InvalidProfile(format!(
                "cpu_period_us must be between 1000 and 1000000, got {}",
                self.cpu_period_us
            )));
        }

        if self.cpu_quota_us < 1_000 {
            return Err(ConfigError::InvalidProfile(format!(
                "cpu_quota_us must be at least 1000, got {}",
                self.cpu_quota_us
            )));
        }

        let mut seen = HashSet::new();
        for mount in &self.tmpfs {
            if !mount.path.starts_with('/') {
                return Err(ConfigError::InvalidProfile(format!(
                    "tmpfs path must be absolute: {}",
                    mount.path
                )));
            }
            if !seen.insert(mount.path.as_str()) {
                return Err(ConfigError::InvalidProfile(format!(
                    "duplicate tmpfs path: {}",
                    mount.path
                )));
            }
            if mount.size.is_empty() || mount.size.contains(',') {
                return Err(ConfigError::InvalidProfile(format!(
                    "invalid tmpfs size for {}: {:?}",
                    mount.path, mount.size
                )));
            }
            if mount.mode.is_empty()
                || mount.mode.len() > 4
                || !mount.mode.chars().all(|c| ('0'..='7').contains(&c))
            {
                return Err(ConfigError::InvalidProfile(format!(
                    "tmpfs mode for {} must be octal digits, got {:?}",
                    mount.path, mount.mode
                )));
            }
        }

        Ok(())
    }
}
