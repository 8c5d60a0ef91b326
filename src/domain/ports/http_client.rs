//! Outbound HTTP port.
//!
//! Abstracts the transport used to reach upstream providers. Transport
//! failures map to the domain error taxonomy; upstream 4xx/5xx responses
//! are returned verbatim because their meaning depends on the caller
//! (the retry policy classifies them, status derivation interprets them).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::GatewayResult;

/// Maximum characters of body carried into diagnostics.
pub const BODY_EXCERPT_LIMIT: usize = 512;

/// Response body, parsed when the upstream declared JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Value),
    Raw(String),
}

/// An upstream response as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lowercased for uniform lookup.
    pub headers: HashMap<String, String>,
    pub body: HttpBody,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The parsed JSON body, if there is one.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            HttpBody::Json(value) => Some(value),
            HttpBody::Raw(_) => None,
        }
    }

    /// The `Location` header, if present.
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location").map(String::as_str)
    }

    /// Truncated body rendering for failure diagnostics.
    pub fn body_excerpt(&self) -> String {
        let text = match &self.body {
            HttpBody::Json(value) => value.to_string(),
            HttpBody::Raw(text) => text.clone(),
        };
        if text.chars().count() <= BODY_EXCERPT_LIMIT {
            text
        } else {
            text.chars().take(BODY_EXCERPT_LIMIT).collect()
        }
    }
}

/// Port for outbound HTTP traffic.
///
/// Implementations own a shared connection pool and must be cheap to
/// clone behind an `Arc`. `close` releases the pool on shutdown.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<HttpResponse>;

    async fn post(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<HttpResponse>;

    /// Release pooled connections. Idempotent.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_excerpt_truncates_long_bodies() {
        let resp = HttpResponse {
            status: 500,
            headers: HashMap::new(),
            body: HttpBody::Raw("x".repeat(2000)),
        };
        assert_eq!(resp.body_excerpt().len(), BODY_EXCERPT_LIMIT);
    }

    #[test]
    fn json_accessor_only_for_json_bodies() {
        let resp = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: HttpBody::Json(json!({"ok": true})),
        };
        assert!(resp.json().is_some());

        let raw = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: HttpBody::Raw("<html>".to_string()),
        };
        assert!(raw.json().is_none());
    }
}
