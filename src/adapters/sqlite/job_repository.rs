//! SQLite implementation of the job repository.
//!
//! Mutations serialize per job through an in-process lock map; different
//! jobs never contend. Snapshots and inputs are stored as JSON text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::{Job, JobStatus, ProcessId, StatusInfo};
use crate::domain::ports::{JobFilter, JobRepository, StatusHistoryEntry};

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Per-job mutation lock. Entries are created on demand and live for
    /// the repository's lifetime; the set of jobs a single instance
    /// touches is bounded.
    async fn job_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    async fn update_inner(&self, job: &Job) -> GatewayResult<()> {
        let status_info = serde_json::to_string(&job.status_info)?;
        let inputs = job.inputs.as_ref().map(serde_json::to_string).transpose()?;
        let results = job.results.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"UPDATE jobs SET remote_job_id = ?, remote_status_url = ?, status = ?,
               status_info = ?, inputs = ?, results = ?, started_at = ?, finished_at = ?,
               updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&job.remote_job_id)
        .bind(&job.remote_status_url)
        .bind(job.status.as_str())
        .bind(&status_info)
        .bind(&inputs)
        .bind(&results)
        .bind(job.started.map(|t| t.to_rfc3339()))
        .bind(job.finished.map(|t| t.to_rfc3339()))
        .bind(job.updated.to_rfc3339())
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> GatewayResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: &Job) -> GatewayResult<()> {
        let lock = self.job_lock(job.id).await;
        let _guard = lock.lock().await;

        let status_info = serde_json::to_string(&job.status_info)?;
        let inputs = job.inputs.as_ref().map(serde_json::to_string).transpose()?;
        let results = job.results.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO jobs (id, process_id, provider, remote_job_id, remote_status_url,
               status, status_info, inputs, results, created_at, started_at, finished_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(job.process_id.to_string())
        .bind(&job.provider_name)
        .bind(&job.remote_job_id)
        .bind(&job.remote_status_url)
        .bind(job.status.as_str())
        .bind(&status_info)
        .bind(&inputs)
        .bind(&results)
        .bind(job.created.to_rfc3339())
        .bind(job.started.map(|t| t.to_rfc3339()))
        .bind(job.finished.map(|t| t.to_rfc3339()))
        .bind(job.updated.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                GatewayError::Conflict(format!("job {} already exists", job.id))
            }
            _ => GatewayError::from(e),
        })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> GatewayResult<Option<Job>> {
        self.fetch(id).await
    }

    async fn update(&self, job: &Job) -> GatewayResult<()> {
        let lock = self.job_lock(job.id).await;
        let _guard = lock.lock().await;
        self.update_inner(job).await
    }

    async fn list(&self, filter: &JobFilter) -> GatewayResult<Vec<Job>> {
        let mut query = String::from("SELECT * FROM jobs WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(process_id) = &filter.process_id {
            query.push_str(" AND process_id = ?");
            bindings.push(process_id.clone());
        }
        if let Some(provider) = &filter.provider {
            query.push_str(" AND provider = ?");
            bindings.push(provider.clone());
        }

        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                query.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<JobRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, filter: &JobFilter) -> GatewayResult<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM jobs WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(process_id) = &filter.process_id {
            query.push_str(" AND process_id = ?");
            bindings.push(process_id.clone());
        }
        if let Some(provider) = &filter.provider {
            query.push_str(" AND provider = ?");
            bindings.push(provider.clone());
        }

        let mut q = sqlx::query_scalar::<_, i64>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        Ok(q.fetch_one(&self.pool).await?)
    }

    async fn append_status(&self, id: Uuid, snapshot: &StatusInfo) -> GatewayResult<()> {
        let lock = self.job_lock(id).await;
        let _guard = lock.lock().await;

        let serialized = serde_json::to_string(snapshot)?;
        let previous: Option<String> = sqlx::query_scalar(
            "SELECT snapshot FROM job_status_history WHERE job_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        // Identical consecutive snapshots are not history.
        if previous.as_deref() == Some(serialized.as_str()) {
            return Ok(());
        }

        sqlx::query(
            r#"INSERT INTO job_status_history (job_id, seq, observed_at, snapshot)
               VALUES (?, COALESCE((SELECT MAX(seq) + 1 FROM job_status_history WHERE job_id = ?), 1), ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(&serialized)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, id: Uuid) -> GatewayResult<Vec<StatusHistoryEntry>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT seq, observed_at, snapshot FROM job_status_history WHERE job_id = ? ORDER BY seq",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(seq, observed_at, snapshot)| {
                Ok(StatusHistoryEntry {
                    job_id: id,
                    seq,
                    observed_at: parse_timestamp(&observed_at)?,
                    snapshot: serde_json::from_str(&snapshot)?,
                })
            })
            .collect()
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> GatewayResult<Option<Job>> {
        let lock = self.job_lock(id).await;
        let _guard = lock.lock().await;

        let Some(mut job) = self.fetch(id).await? else {
            return Ok(None);
        };
        if job.is_terminal() {
            return Ok(Some(job));
        }

        let failed = StatusInfo::failed(job.id, &job.process_id, reason);
        job.apply_status_info(failed)?;
        self.update_inner(&job).await?;
        Ok(Some(job))
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    process_id: String,
    provider: String,
    remote_job_id: Option<String>,
    remote_status_url: Option<String>,
    status: String,
    status_info: String,
    inputs: Option<String>,
    results: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = GatewayError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status)
            .ok_or_else(|| GatewayError::Database(format!("unknown job status '{}'", row.status)))?;
        Ok(Job {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| GatewayError::Database(format!("bad job id: {e}")))?,
            process_id: ProcessId::parse(&row.process_id)?,
            provider_name: row.provider,
            remote_job_id: row.remote_job_id,
            remote_status_url: row.remote_status_url,
            status,
            status_info: serde_json::from_str(&row.status_info)?,
            inputs: row
                .inputs
                .map(|s| serde_json::from_str::<Value>(&s))
                .transpose()?,
            results: row
                .results
                .map(|s| serde_json::from_str::<Value>(&s))
                .transpose()?,
            created: parse_timestamp(&row.created_at)?,
            started: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            finished: row.finished_at.as_deref().map(parse_timestamp).transpose()?,
            updated: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> GatewayResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GatewayError::Database(format!("bad timestamp '{s}': {e}")))
}
