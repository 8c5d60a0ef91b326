//! HTTP surface: a thin axum adapter over the service layer.
//!
//! Routing and body parsing only; every semantic lives in the services.
//! The API mounts once per supported version under `/v{major}.{minor}`.

pub mod error;
pub mod jobs;
pub mod processes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::services::{GatewayConfig, JobManager, ProcessManager};

pub use error::OgcException;

#[derive(Clone)]
pub struct AppState {
    pub job_manager: Arc<JobManager>,
    pub processes: Arc<ProcessManager>,
    pub config: Arc<GatewayConfig>,
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/processes", get(processes::list_processes))
        .route("/processes/:id", get(processes::get_process))
        .route("/processes/:id/execution", post(processes::execute_process))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/results", get(jobs::get_results))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Build the full router with one mount per supported API version.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health));
    for version in &state.config.supported_api_versions {
        router = router.nest(&format!("/v{version}"), api_routes());
    }
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
