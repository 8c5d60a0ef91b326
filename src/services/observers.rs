//! Observer bus and built-in lifecycle observers.
//!
//! The bus invokes observers sequentially in registration order and
//! isolates every call: an observer error is logged and swallowed, never
//! propagated to the job manager or to the remaining observers.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::errors::GatewayResult;
use crate::domain::models::{Job, JobStatus, StatusInfo};
use crate::domain::ports::{HttpClientPort, JobObserver, JobRepository};
use crate::services::job_manager::PollCoordinator;
use crate::services::registry::ProviderRegistry;

/// Fan-out of lifecycle events to registered observers.
#[derive(Default)]
pub struct ObserverBus {
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn JobObserver>) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    fn snapshot(&self) -> Vec<Arc<dyn JobObserver>> {
        self.observers
            .read()
            .expect("observer lock poisoned")
            .clone()
    }

    pub async fn job_created(&self, job: &Job, snapshot: &StatusInfo) {
        for observer in self.snapshot() {
            if let Err(err) = observer.on_job_created(job, snapshot).await {
                tracing::error!(
                    observer = observer.name(),
                    job_id = %job.id,
                    error = %err,
                    "on_job_created observer failed"
                );
            }
        }
    }

    pub async fn status_changed(&self, job: &Job, old: Option<&StatusInfo>, new: &StatusInfo) {
        for observer in self.snapshot() {
            if let Err(err) = observer.on_status_changed(job, old, new).await {
                tracing::error!(
                    observer = observer.name(),
                    job_id = %job.id,
                    error = %err,
                    "on_status_changed observer failed"
                );
            }
        }
    }

    pub async fn job_completed(&self, job: &Job, final_snapshot: &StatusInfo) {
        for observer in self.snapshot() {
            if let Err(err) = observer.on_job_completed(job, final_snapshot).await {
                tracing::error!(
                    observer = observer.name(),
                    job_id = %job.id,
                    error = %err,
                    "on_job_completed observer failed"
                );
            }
        }
    }
}

/// Records every snapshot into the append-only status history.
///
/// Completion is not recorded separately: the terminal snapshot already
/// arrived through the preceding status change.
pub struct StatusHistoryObserver {
    repo: Arc<dyn JobRepository>,
}

impl StatusHistoryObserver {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl JobObserver for StatusHistoryObserver {
    fn name(&self) -> &'static str {
        "status-history"
    }

    async fn on_job_created(&self, job: &Job, snapshot: &StatusInfo) -> GatewayResult<()> {
        self.repo.append_status(job.id, snapshot).await
    }

    async fn on_status_changed(
        &self,
        job: &Job,
        _old: Option<&StatusInfo>,
        new: &StatusInfo,
    ) -> GatewayResult<()> {
        self.repo.append_status(job.id, new).await
    }
}

/// Starts and stops poll tasks as jobs move through their lifecycle.
pub struct PollingSchedulerObserver {
    poller: Arc<PollCoordinator>,
}

impl PollingSchedulerObserver {
    pub fn new(poller: Arc<PollCoordinator>) -> Self {
        Self { poller }
    }
}

#[async_trait]
impl JobObserver for PollingSchedulerObserver {
    fn name(&self) -> &'static str {
        "polling-scheduler"
    }

    async fn on_status_changed(
        &self,
        job: &Job,
        _old: Option<&StatusInfo>,
        _new: &StatusInfo,
    ) -> GatewayResult<()> {
        if job.is_terminal() {
            self.poller.cancel(job.id).await;
        } else if job.remote_status_url.is_some() {
            self.poller.schedule(job.id).await;
        }
        Ok(())
    }
}

/// Probes remote results after a successful completion.
///
/// A probe failure is logged as a warning; it never transitions the job,
/// which is already terminal by the time this observer runs. The
/// downgrade-on-failure policy is enforced earlier, before a successful
/// snapshot is accepted.
pub struct ResultsVerificationObserver {
    http: Arc<dyn HttpClientPort>,
    registry: Arc<ProviderRegistry>,
}

impl ResultsVerificationObserver {
    pub fn new(http: Arc<dyn HttpClientPort>, registry: Arc<ProviderRegistry>) -> Self {
        Self { http, registry }
    }
}

#[async_trait]
impl JobObserver for ResultsVerificationObserver {
    fn name(&self) -> &'static str {
        "results-verification"
    }

    async fn on_job_completed(&self, job: &Job, final_snapshot: &StatusInfo) -> GatewayResult<()> {
        if final_snapshot.status != JobStatus::Successful {
            return Ok(());
        }
        // Locally stored results need no probe.
        if job.results.is_some() {
            return Ok(());
        }
        let Some(remote_job_id) = &job.remote_job_id else {
            tracing::debug!(job_id = %job.id, "no remote job id, skipping results probe");
            return Ok(());
        };
        let Some(provider) = self.registry.get(&job.provider_name) else {
            tracing::debug!(job_id = %job.id, provider = %job.provider_name, "provider gone, skipping results probe");
            return Ok(());
        };

        let url = provider.remote_results_url(remote_job_id);
        match self
            .http
            .get(&url, provider.timeout, &provider.auth_headers())
            .await
        {
            Ok(response) if response.is_success() => {
                tracing::debug!(job_id = %job.id, "remote results accessible");
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %job.id,
                    url = %url,
                    status = response.status,
                    "remote results probe returned an error status"
                );
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %job.id,
                    url = %url,
                    error = %err,
                    "remote results probe failed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::errors::GatewayError;
    use crate::domain::models::ProcessId;

    struct FailingObserver;

    #[async_trait]
    impl JobObserver for FailingObserver {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn on_job_created(&self, _job: &Job, _snapshot: &StatusInfo) -> GatewayResult<()> {
            Err(GatewayError::internal("observer exploded"))
        }
    }

    struct CountingObserver {
        created: AtomicUsize,
    }

    #[async_trait]
    impl JobObserver for CountingObserver {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_job_created(&self, _job: &Job, _snapshot: &StatusInfo) -> GatewayResult<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn observer_failure_does_not_block_later_observers() {
        let bus = ObserverBus::new();
        let counting = Arc::new(CountingObserver {
            created: AtomicUsize::new(0),
        });
        bus.register(Arc::new(FailingObserver));
        bus.register(counting.clone());

        let job = Job::new(ProcessId::new("ms1", "square").unwrap(), None);
        bus.job_created(&job, &job.status_info).await;

        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
    }
}
