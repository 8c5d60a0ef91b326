//! Gateway configuration.
//!
//! Settings come from programmatic defaults overridden by `UMP_`-prefixed
//! environment variables. Durations are configured in seconds (fractional
//! values allowed where sub-second cadences matter, e.g. poll intervals
//! in tests).

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Extraction(#[from] figment::Error),
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Log filter, e.g. `info` or `ump_gateway=debug`.
    pub log_level: String,
    /// YAML file listing upstream providers.
    pub providers_file: PathBuf,
    pub database_url: String,
    /// Listen address for the HTTP surface.
    pub bind_addr: String,
    /// Public base URL used in self links and rewritten upstream links.
    pub api_server_url: String,
    /// API versions mounted as `/v{major}.{minor}`.
    pub supported_api_versions: Vec<String>,
    /// Poll loop cadence in seconds.
    pub poll_interval_s: f64,
    /// Max job runtime before forced failure; unset disables the deadline.
    pub poll_timeout_s: Option<f64>,
    /// Total forward attempts including the first.
    pub forward_max_retries: u32,
    pub forward_retry_base_s: f64,
    pub forward_retry_max_s: f64,
    /// Rewrite upstream links onto the gateway's public base URL.
    pub rewrite_remote_links: bool,
    /// TTL for both process caches, in seconds.
    pub process_cache_ttl_s: u64,
    /// Upstream call timeout when a provider does not configure one.
    pub default_provider_timeout_s: u64,
    /// Probe remote results after a successful completion.
    pub verify_remote_results: bool,
    /// Downgrade a successful job to failed when the probe fails.
    pub downgrade_on_verify_failure: bool,
    /// How long shutdown waits for poll tasks before aborting them.
    pub shutdown_grace_s: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            providers_file: PathBuf::from("providers.yaml"),
            database_url: "sqlite:ump.db".to_string(),
            bind_addr: "127.0.0.1:5000".to_string(),
            api_server_url: "http://localhost:5000".to_string(),
            supported_api_versions: vec!["1.0".to_string()],
            poll_interval_s: 5.0,
            poll_timeout_s: None,
            forward_max_retries: 3,
            forward_retry_base_s: 1.0,
            forward_retry_max_s: 5.0,
            rewrite_remote_links: true,
            process_cache_ttl_s: 60,
            default_provider_timeout_s: 60,
            verify_remote_results: true,
            downgrade_on_verify_failure: false,
            shutdown_grace_s: 5,
        }
    }
}

impl GatewayConfig {
    /// Load defaults overridden by `UMP_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("UMP_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_max_retries == 0 {
            return Err(ConfigError::Validation {
                field: "forward_max_retries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.forward_retry_base_s <= 0.0 {
            return Err(ConfigError::Validation {
                field: "forward_retry_base_s".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.forward_retry_base_s > self.forward_retry_max_s {
            return Err(ConfigError::Validation {
                field: "forward_retry_base_s".to_string(),
                reason: "must not exceed forward_retry_max_s".to_string(),
            });
        }
        if self.poll_interval_s <= 0.0 {
            return Err(ConfigError::Validation {
                field: "poll_interval_s".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.supported_api_versions.is_empty() {
            return Err(ConfigError::Validation {
                field: "supported_api_versions".to_string(),
                reason: "at least one version required".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_s.map(Duration::from_secs_f64)
    }

    pub fn forward_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.forward_max_retries,
            base_wait: Duration::from_secs_f64(self.forward_retry_base_s),
            max_wait: Duration::from_secs_f64(self.forward_retry_max_s),
        }
    }

    pub fn process_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.process_cache_ttl_s)
    }

    pub fn default_provider_timeout(&self) -> Duration {
        Duration::from_secs(self.default_provider_timeout_s)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.poll_interval_s, 5.0);
        assert_eq!(config.forward_max_retries, 3);
        assert_eq!(config.forward_retry_base_s, 1.0);
        assert_eq!(config.forward_retry_max_s, 5.0);
        assert_eq!(config.process_cache_ttl_s, 60);
        assert!(config.rewrite_remote_links);
        assert_eq!(config.api_server_url, "http://localhost:5000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let config = GatewayConfig {
            forward_max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_base_must_not_exceed_cap() {
        let config = GatewayConfig {
            forward_retry_base_s: 10.0,
            forward_retry_max_s: 5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
