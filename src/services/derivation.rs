//! Status derivation: converting upstream responses into canonical
//! status snapshots.
//!
//! Providers acknowledge executions in four recognizably different
//! shapes. Each shape is handled by one strategy; strategies are
//! consulted in priority order and the first applicable one wins. The
//! final strategy always applies, so derivation is total.
//!
//! Strategies never read the clock, so two derivations over byte-identical
//! upstream responses produce byte-identical snapshots. Timestamps are
//! injected later, when a snapshot is applied to a job.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::domain::models::{Job, JobStatus, Link, Provider, StatusInfo};
use crate::domain::ports::{HttpClientPort, HttpResponse};

/// Inputs to a derivation pass.
pub struct DerivationContext<'a> {
    pub job: &'a Job,
    pub provider: &'a Provider,
    pub response: &'a HttpResponse,
}

/// Outcome of a derivation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub status_info: StatusInfo,
    /// Upstream job id, when the provider reported one.
    pub remote_job_id: Option<String>,
    /// Absolute URL for subsequent polling, stored even when the initial
    /// follow-up failed.
    pub remote_status_url: Option<String>,
    /// Outputs captured from a synchronous response.
    pub outputs: Option<Value>,
    /// Extra failure context for logs, never shown to callers.
    pub diagnostic: Option<String>,
}

impl Derived {
    fn of(status_info: StatusInfo) -> Self {
        Self {
            status_info,
            remote_job_id: None,
            remote_status_url: None,
            outputs: None,
            diagnostic: None,
        }
    }
}

/// One rule for interpreting an upstream response.
#[async_trait]
pub trait DerivationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn applies(&self, ctx: &DerivationContext<'_>) -> bool;
    async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived;
}

/// A body is a status document when it carries both `jobID` and `status`.
fn looks_like_status_info(body: Option<&Value>) -> bool {
    body.and_then(Value::as_object)
        .is_some_and(|obj| obj.contains_key("jobID") && obj.contains_key("status"))
}

fn has_outputs(body: Option<&Value>) -> bool {
    body.and_then(Value::as_object)
        .is_some_and(|obj| obj.contains_key("outputs"))
}

/// Whether a poll response carries something worth deriving from: a
/// status document or immediate outputs. Anything else is treated as a
/// transient glitch by the poll loop, which logs and keeps polling
/// rather than failing the job.
pub fn poll_derivable(response: &HttpResponse) -> bool {
    looks_like_status_info(response.json()) || has_outputs(response.json())
}

enum ParsedStatus {
    /// Valid snapshot plus the remote job id when it differs from ours.
    Ok(StatusInfo, Option<String>),
    /// Structurally a status document, but with a status value we do not
    /// know.
    UnknownStatus(String),
    Invalid,
}

/// Parse a status document, normalizing `jobID` to the local id.
fn parse_status_info(job: &Job, body: &Value) -> ParsedStatus {
    match serde_json::from_value::<StatusInfo>(body.clone()) {
        Ok(mut si) => {
            let local = job.id.to_string();
            let remote_job_id = (si.job_id != local).then(|| si.job_id.clone());
            si.job_id = local;
            si.process_id = Some(job.process_id.to_string());
            ParsedStatus::Ok(si, remote_job_id)
        }
        Err(_) => {
            let status = body.get("status").and_then(Value::as_str);
            match status {
                Some(s) if JobStatus::from_str(s).is_none() => {
                    ParsedStatus::UnknownStatus(s.to_string())
                }
                _ => ParsedStatus::Invalid,
            }
        }
    }
}

/// Resolve a `Location` header against the provider base. Absolute URLs
/// pass through untouched, even when they point at a different host;
/// some providers run status endpoints elsewhere.
fn resolve_location(base: &Url, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    base.join(location)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| {
            format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                location.trim_start_matches('/')
            )
        })
}

/// Strategy 1: the body is a status document.
struct DirectStatusInfo;

#[async_trait]
impl DerivationStrategy for DirectStatusInfo {
    fn name(&self) -> &'static str {
        "direct-status-info"
    }

    fn applies(&self, ctx: &DerivationContext<'_>) -> bool {
        looks_like_status_info(ctx.response.json())
    }

    async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived {
        let body = ctx.response.json().expect("applies() checked body");
        match parse_status_info(ctx.job, body) {
            ParsedStatus::Ok(si, remote_job_id) => {
                let mut derived = Derived::of(si);
                derived.remote_status_url = ctx
                    .response
                    .location()
                    .map(|l| resolve_location(&ctx.provider.base_url, l));
                // Without a Location header the conventional upstream
                // status endpoint still lets us poll.
                if derived.remote_status_url.is_none() {
                    if let Some(remote) = &remote_job_id {
                        derived.remote_status_url = Some(format!(
                            "{}/jobs/{remote}",
                            ctx.provider.base_url.as_str().trim_end_matches('/')
                        ));
                    }
                }
                derived.remote_job_id = remote_job_id;
                derived
            }
            ParsedStatus::UnknownStatus(value) => {
                let mut derived = Derived::of(StatusInfo::failed(
                    ctx.job.id,
                    &ctx.job.process_id,
                    format!("Upstream reported unknown status value '{value}'"),
                ));
                derived.diagnostic = Some(format!("unknown_status:{value}"));
                derived
            }
            ParsedStatus::Invalid => {
                let mut derived = Derived::of(StatusInfo::failed(
                    ctx.job.id,
                    &ctx.job.process_id,
                    "Could not parse status document from upstream response",
                ));
                derived.diagnostic = Some("status_info_parse_error".to_string());
                derived
            }
        }
    }
}

/// Strategy 2: outputs without a status, i.e. synchronous completion.
struct ImmediateResults;

#[async_trait]
impl DerivationStrategy for ImmediateResults {
    fn name(&self) -> &'static str {
        "immediate-results"
    }

    fn applies(&self, ctx: &DerivationContext<'_>) -> bool {
        let body = ctx.response.json();
        has_outputs(body) && !looks_like_status_info(body)
    }

    async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived {
        let outputs = ctx
            .response
            .json()
            .and_then(|b| b.get("outputs"))
            .cloned();

        let mut derived = Derived::of(immediate_success(ctx.job));
        derived.outputs = outputs;
        derived
    }
}

/// Synthesized terminal snapshot for synchronous completions. Only a
/// handle to the outputs belongs in the snapshot.
fn immediate_success(job: &Job) -> StatusInfo {
    let mut si = StatusInfo::new(job.id, &job.process_id, JobStatus::Successful);
    si.message = Some("Completed (immediate results)".to_string());
    si.progress = Some(100);
    si.links = vec![Link::job_results(job.id)];
    si
}

/// Strategy 3: no status in the body, but a `Location` header to follow.
struct LocationFollowup {
    http: Arc<dyn HttpClientPort>,
}

#[async_trait]
impl DerivationStrategy for LocationFollowup {
    fn name(&self) -> &'static str {
        "location-followup"
    }

    fn applies(&self, ctx: &DerivationContext<'_>) -> bool {
        !looks_like_status_info(ctx.response.json()) && ctx.response.location().is_some()
    }

    async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived {
        let location = ctx.response.location().expect("applies() checked header");
        let resolved = resolve_location(&ctx.provider.base_url, location);

        let outcome = self
            .http
            .get(
                &resolved,
                ctx.provider.timeout,
                &ctx.provider.auth_headers(),
            )
            .await;

        let mut derived = match outcome {
            Ok(follow) if looks_like_status_info(follow.json()) => {
                let body = follow.json().expect("checked");
                match parse_status_info(ctx.job, body) {
                    ParsedStatus::Ok(si, remote_job_id) => {
                        let mut derived = Derived::of(si);
                        derived.remote_job_id = remote_job_id;
                        derived
                    }
                    ParsedStatus::UnknownStatus(value) => {
                        let mut derived = Derived::of(StatusInfo::failed(
                            ctx.job.id,
                            &ctx.job.process_id,
                            format!("Upstream reported unknown status value '{value}'"),
                        ));
                        derived.diagnostic = Some(format!("unknown_status:{value}"));
                        derived
                    }
                    ParsedStatus::Invalid => {
                        let mut derived = Derived::of(StatusInfo::failed(
                            ctx.job.id,
                            &ctx.job.process_id,
                            "Status endpoint returned an unparseable document",
                        ));
                        derived.diagnostic = Some(format!("followup_parse_error: {resolved}"));
                        derived
                    }
                }
            }
            Ok(follow) if has_outputs(follow.json()) => {
                let outputs = follow.json().and_then(|b| b.get("outputs")).cloned();
                let mut derived = Derived::of(immediate_success(ctx.job));
                derived.outputs = outputs;
                derived
            }
            Ok(follow) => {
                let mut derived = Derived::of(StatusInfo::failed(
                    ctx.job.id,
                    &ctx.job.process_id,
                    format!(
                        "No status information at Location (HTTP {}): {}",
                        follow.status,
                        follow.body_excerpt()
                    ),
                ));
                derived.diagnostic = Some(format!("no_status_at_location: {resolved}"));
                derived
            }
            Err(err) => {
                let mut derived = Derived::of(StatusInfo::failed(
                    ctx.job.id,
                    &ctx.job.process_id,
                    "Failed to fetch status from Location header",
                ));
                derived.diagnostic = Some(format!("followup_failed: {resolved}: {err}"));
                derived
            }
        };

        // The resolved URL is kept regardless of the follow-up outcome so
        // the poll loop can keep trying.
        derived.remote_status_url = Some(resolved);
        derived
    }
}

/// Strategy 4: catch-all failure.
struct FallbackFailed;

#[async_trait]
impl DerivationStrategy for FallbackFailed {
    fn name(&self) -> &'static str {
        "fallback-failed"
    }

    fn applies(&self, _ctx: &DerivationContext<'_>) -> bool {
        true
    }

    async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived {
        let mut derived = Derived::of(StatusInfo::failed(
            ctx.job.id,
            &ctx.job.process_id,
            format!(
                "Upstream response (HTTP {}) missing status information: {}",
                ctx.response.status,
                ctx.response.body_excerpt()
            ),
        ));
        derived.diagnostic = Some(format!("upstream_status={}", ctx.response.status));
        derived
    }
}

/// Priority-ordered strategy dispatcher.
pub struct StatusDeriver {
    strategies: Vec<Box<dyn DerivationStrategy>>,
}

impl StatusDeriver {
    pub fn new(http: Arc<dyn HttpClientPort>) -> Self {
        Self {
            strategies: vec![
                Box::new(DirectStatusInfo),
                Box::new(ImmediateResults),
                Box::new(LocationFollowup { http }),
                Box::new(FallbackFailed),
            ],
        }
    }

    /// Derive a snapshot via the first applicable strategy. Total: the
    /// fallback strategy always applies.
    pub async fn derive(&self, ctx: &DerivationContext<'_>) -> Derived {
        for strategy in &self.strategies {
            if strategy.applies(ctx) {
                tracing::debug!(
                    job_id = %ctx.job.id,
                    strategy = strategy.name(),
                    "deriving status"
                );
                return strategy.derive(ctx).await;
            }
        }
        unreachable!("fallback strategy always applies")
    }
}
