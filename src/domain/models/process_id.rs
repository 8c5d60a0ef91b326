//! Canonical process identifiers.
//!
//! Every federated process is addressed as `{provider}:{bare_id}`. The
//! provider prefix routes requests; the bare id is what the upstream
//! service knows the process as.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{GatewayError, GatewayResult};

/// A validated `{provider}:{bare_id}` process identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProcessId {
    provider: String,
    bare: String,
}

impl ProcessId {
    /// Compose a canonical id from its parts, validating both components.
    pub fn new(provider: impl Into<String>, bare: impl Into<String>) -> GatewayResult<Self> {
        let provider = provider.into();
        let bare = bare.into();
        if !is_valid_component(&provider) {
            return Err(GatewayError::InvalidInput(format!(
                "invalid provider name '{provider}'"
            )));
        }
        if !is_valid_component(&bare) {
            return Err(GatewayError::InvalidInput(format!(
                "invalid process id '{bare}'"
            )));
        }
        Ok(Self { provider, bare })
    }

    /// Parse a wire-form id, splitting on the first colon.
    pub fn parse(s: &str) -> GatewayResult<Self> {
        let (provider, bare) = s
            .split_once(':')
            .ok_or_else(|| GatewayError::InvalidInput(format!("'{s}' has no provider prefix")))?;
        Self::new(provider, bare)
    }

    /// Cheaply extract the provider prefix without a full parse.
    ///
    /// Returns `None` when `s` has no colon or the prefix is not a valid
    /// provider name, i.e. when `s` should be treated as a bare id.
    pub fn extract_provider(s: &str) -> Option<&str> {
        let (provider, _) = s.split_once(':')?;
        is_valid_component(provider).then_some(provider)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn bare(&self) -> &str {
        &self.bare
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.bare)
    }
}

impl FromStr for ProcessId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProcessId {
    type Error = GatewayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ProcessId> for String {
    fn from(id: ProcessId) -> Self {
        id.to_string()
    }
}

/// Both id components must match `[A-Za-z0-9_-]+`.
fn is_valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
