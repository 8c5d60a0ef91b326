//! Observer port for job lifecycle events.

use async_trait::async_trait;

use crate::domain::errors::GatewayResult;
use crate::domain::models::{Job, StatusInfo};

/// Subscriber to job lifecycle transitions.
///
/// Implementations override the hooks they care about; defaults are
/// no-ops. Observers are invoked sequentially in registration order for a
/// given job, and a failure in one observer never prevents the others
/// from running; the bus logs and continues.
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// Name used in logs when an observer fails.
    fn name(&self) -> &'static str;

    /// Fired exactly once per job, after the accepted snapshot is
    /// persisted and before any status change.
    async fn on_job_created(&self, _job: &Job, _snapshot: &StatusInfo) -> GatewayResult<()> {
        Ok(())
    }

    /// Fired whenever a new snapshot differing from the previous one is
    /// applied.
    async fn on_status_changed(
        &self,
        _job: &Job,
        _old: Option<&StatusInfo>,
        _new: &StatusInfo,
    ) -> GatewayResult<()> {
        Ok(())
    }

    /// Fired once when a job reaches a terminal status, after the final
    /// `on_status_changed`.
    async fn on_job_completed(&self, _job: &Job, _final_snapshot: &StatusInfo) -> GatewayResult<()> {
        Ok(())
    }
}
