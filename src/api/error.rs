//! OGC exception documents for HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::GatewayError;

/// The OGC API error document shape.
#[derive(Debug, Clone, Serialize)]
pub struct OgcException {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OgcException {
    pub fn new(status: StatusCode, title: &str, detail: Option<String>) -> Self {
        Self {
            kind: "about:blank".to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail,
        }
    }
}

impl IntoResponse for OgcException {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let exception = match &self {
            GatewayError::InvalidInput(detail) => OgcException::new(
                StatusCode::BAD_REQUEST,
                "Invalid Input",
                Some(detail.clone()),
            ),
            GatewayError::ProcessNotFound(id) => OgcException::new(
                StatusCode::NOT_FOUND,
                "Not Found",
                Some(format!("Process '{id}' not found")),
            ),
            GatewayError::JobNotFound(id) => OgcException::new(
                StatusCode::NOT_FOUND,
                "Not Found",
                Some(format!("Job '{id}' not found")),
            ),
            GatewayError::Conflict(detail) => {
                OgcException::new(StatusCode::CONFLICT, "Conflict", Some(detail.clone()))
            }
            GatewayError::ShuttingDown => OgcException::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
                Some("The gateway is shutting down".to_string()),
            ),
            GatewayError::Timeout(detail) => OgcException::new(
                StatusCode::GATEWAY_TIMEOUT,
                "Gateway Timeout",
                Some(detail.clone()),
            ),
            GatewayError::Transport(detail)
            | GatewayError::BadGateway(detail) => OgcException::new(
                StatusCode::BAD_GATEWAY,
                "Bad Gateway",
                Some(detail.clone()),
            ),
            GatewayError::TransientUpstream { status, detail }
            | GatewayError::TerminalUpstream { status, detail } => OgcException::new(
                StatusCode::BAD_GATEWAY,
                "Bad Gateway",
                Some(format!("upstream status {status}: {detail}")),
            ),
            GatewayError::Internal { correlation_id } => OgcException::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                Some(format!("correlation id {correlation_id}")),
            ),
            GatewayError::InvalidTransition { .. }
            | GatewayError::Database(_)
            | GatewayError::Serialization(_) => {
                // Opaque to callers; the detail goes to the logs with a
                // correlation id to match on.
                let GatewayError::Internal { correlation_id } = GatewayError::internal(&self)
                else {
                    unreachable!()
                };
                OgcException::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    Some(format!("correlation id {correlation_id}")),
                )
            }
        };
        exception.into_response()
    }
}
