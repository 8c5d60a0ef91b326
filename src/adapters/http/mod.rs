//! Reqwest-backed implementation of the outbound HTTP port.
//!
//! One shared `reqwest::Client` (and thus one connection pool) serves all
//! providers. Per-call timeouts come from the caller so each provider's
//! configured deadline applies.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::ports::{HttpBody, HttpClientPort, HttpResponse};

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    http: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    fn build_headers(headers: &HashMap<String, String>) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping malformed outbound header"),
            }
        }
        map
    }

    fn map_error(url: &str, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(format!("{url}: {err}"))
        } else {
            GatewayError::Transport(format!("{url}: {err}"))
        }
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        timeout: Duration,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<HttpResponse> {
        let mut request = self
            .http
            .request(method, url)
            .timeout(timeout)
            .headers(Self::build_headers(headers));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Self::map_error(url, err))?;

        let status = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }

        let declared_json = response_headers
            .get("content-type")
            .is_some_and(|ct| ct.contains("json"));
        let text = response
            .text()
            .await
            .map_err(|err| Self::map_error(url, err))?;

        // A declared-JSON body that fails to parse falls back to raw text;
        // callers that require JSON raise BadGateway on the raw variant.
        let body = if declared_json {
            match serde_json::from_str(&text) {
                Ok(value) => HttpBody::Json(value),
                Err(_) => HttpBody::Raw(text),
            }
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) if text.trim_start().starts_with(['{', '[']) => HttpBody::Json(value),
                _ => HttpBody::Raw(text),
            }
        };

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttpClient {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<HttpResponse> {
        self.request(Method::GET, url, None, timeout, headers).await
    }

    async fn post(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<HttpResponse> {
        self.request(Method::POST, url, Some(body), timeout, headers)
            .await
    }

    async fn close(&self) {
        // reqwest pools close when the last clone drops; nothing to do
        // beyond logging the release for shutdown traces.
        tracing::debug!("releasing HTTP client pool");
    }
}
