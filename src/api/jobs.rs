//! Job status and results routes.
//!
//! Responses only ever carry the local job id; remote identifiers stay
//! internal.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::{JobStatus, Link, StatusInfo};
use crate::domain::ports::JobFilter;
use crate::domain::{GatewayError, GatewayResult};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, serde::Serialize)]
pub struct JobList {
    pub jobs: Vec<StatusInfo>,
    pub links: Vec<Link>,
}

/// `GET /jobs`: list jobs with paging and status filter.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> GatewayResult<Json<JobList>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            JobStatus::from_str(s)
                .ok_or_else(|| GatewayError::InvalidInput(format!("unknown status '{s}'")))
        })
        .transpose()?;

    let filter = JobFilter {
        status,
        limit: Some(query.limit),
        offset: Some(query.offset),
        ..Default::default()
    };
    let jobs = state.job_manager.list_jobs(&filter).await?;

    Ok(Json(JobList {
        jobs: jobs.into_iter().map(|j| j.status_info).collect(),
        links: vec![Link::new("/jobs", "self").with_title("Job list")],
    }))
}

/// `GET /jobs/{id}`: current status snapshot.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<Json<StatusInfo>> {
    let job = state.job_manager.get_job(id).await?;
    Ok(Json(job.status_info))
}

/// `GET /jobs/{id}/results`: results of a successful job, proxied from
/// the provider unless they were captured synchronously.
pub async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<Json<Value>> {
    let results = state.job_manager.get_results(id).await?;
    Ok(Json(results))
}
