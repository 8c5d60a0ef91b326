//! Process discovery and execution routes.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::domain::models::{Link, ProcessSummary};
use crate::domain::GatewayResult;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct ProcessList {
    pub processes: Vec<ProcessSummary>,
    pub links: Vec<Link>,
}

/// `GET /processes`: all federated processes.
pub async fn list_processes(State(state): State<AppState>) -> Json<ProcessList> {
    let processes = state.processes.list_all().await;
    Json(ProcessList {
        processes,
        links: vec![Link::new("/processes", "self").with_title("Process list")],
    })
}

/// `GET /processes/{id}`: one process descriptor.
pub async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Value>> {
    let descriptor = state.processes.get(&id).await?;
    Ok(Json(Value::Object(descriptor.doc)))
}

/// `POST /processes/{id}/execution`: create a job and forward.
///
/// Always answers 201 once the local job exists; forward failures are
/// carried in the returned status document, not the HTTP status.
pub async fn execute_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> GatewayResult<Response> {
    let headers = lowercase_headers(&headers);
    let outcome = state
        .job_manager
        .create_and_forward(&id, payload, &headers)
        .await?;

    Ok((
        StatusCode::CREATED,
        [(LOCATION, outcome.location)],
        Json(outcome.status_info),
    )
        .into_response())
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}
