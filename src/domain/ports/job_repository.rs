//! Repository port for job persistence and status history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::GatewayResult;
use crate::domain::models::{Job, JobStatus, StatusInfo};

/// Filter criteria for job listings. Empty fields match everything;
/// multiple fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub process_id: Option<String>,
    pub provider: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One append-only history record. `seq` is strictly increasing per job.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusHistoryEntry {
    pub job_id: Uuid,
    pub seq: i64,
    pub observed_at: DateTime<Utc>,
    pub snapshot: StatusInfo,
}

/// Port for durable job storage.
///
/// All mutations serialize per job: implementations hold a per-id lock so
/// concurrent updates to the same job cannot interleave, while different
/// jobs proceed independently.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job. Fails if the id already exists.
    async fn create(&self, job: &Job) -> GatewayResult<()>;

    async fn get(&self, id: Uuid) -> GatewayResult<Option<Job>>;

    /// Replace the mutable fields of an existing job. `id`, `created` and
    /// `process_id` are never touched.
    async fn update(&self, job: &Job) -> GatewayResult<()>;

    async fn list(&self, filter: &JobFilter) -> GatewayResult<Vec<Job>>;

    async fn count(&self, filter: &JobFilter) -> GatewayResult<i64>;

    /// Append a snapshot to the history with the next sequence number.
    ///
    /// A no-op when the snapshot is byte-identical to the previous entry,
    /// so repeated appends of the same observation leave the history
    /// unchanged.
    async fn append_status(&self, id: Uuid, snapshot: &StatusInfo) -> GatewayResult<()>;

    async fn history(&self, id: Uuid) -> GatewayResult<Vec<StatusHistoryEntry>>;

    /// Force a job into terminal failure with a human-readable reason.
    /// Returns the updated job, or `None` if it does not exist. A no-op
    /// for jobs that are already terminal.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> GatewayResult<Option<Job>>;
}
