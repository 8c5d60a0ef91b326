//! Error taxonomy for the federation gateway.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the gateway core.
///
/// Only `InvalidInput` and the `*NotFound` variants ever reach an HTTP
/// caller directly; upstream failures inside the job lifecycle are folded
/// into failed status snapshots instead of propagating.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream deadline exceeded: {0}")]
    Timeout(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Transient upstream failure (status {status}): {detail}")]
    TransientUpstream { status: u16, detail: String },

    #[error("Terminal upstream failure (status {status}): {detail}")]
    TerminalUpstream { status: u16, detail: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error [{correlation_id}]")]
    Internal { correlation_id: Uuid },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Mint an `Internal` error with a fresh correlation id, logging the
    /// underlying detail so the id can be matched against the logs.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(%correlation_id, "internal error: {detail}");
        Self::Internal { correlation_id }
    }

    /// Whether this failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::TransientUpstream { .. }
        )
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
