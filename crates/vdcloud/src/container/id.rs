//! Container identifier grammar.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ContainerError;

/// Truncated ids are 12 hex digits, full ids 64.
static CONTAINER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{12,64}$").expect("static regex is valid"));

/// A lowercase hexadecimal container identifier, 12 to 64 characters long.
///
/// Values only exist after passing [`ContainerId::parse`], so anything that
/// reaches the runtime has already been checked against the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Validate and wrap an identifier.
    pub fn parse(value: &str) -> Result<Self, ContainerError> {
        if CONTAINER_ID.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ContainerError::InvalidInput(format!(
                "container id must be 12-64 lowercase hex digits: {value:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` is a (possibly truncated) form of `full`.
    pub fn is_prefix_of(&self, full: &str) -> bool {
        full.starts_with(&self.0)
    }

    /// The 12-character short form used in logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerId {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = ContainerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}
