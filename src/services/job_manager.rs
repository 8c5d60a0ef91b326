//! Job lifecycle engine.
//!
//! Coordinates job creation, execution forwarding with retry, status
//! derivation, background polling and shutdown. Upstream failures after
//! a job exists never surface as errors: they become failed snapshots on
//! the job, and the execute request still answers 201.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::{Job, JobStatus, ProcessId, Provider, StatusInfo};
use crate::domain::ports::{HttpClientPort, JobFilter, JobObserver, JobRepository};
use crate::services::config::GatewayConfig;
use crate::services::derivation::{poll_derivable, DerivationContext, Derived, StatusDeriver};
use crate::services::observers::ObserverBus;
use crate::services::process_manager::ProcessManager;
use crate::services::registry::ProviderRegistry;
use crate::services::retry::{RetryConfig, RetryPolicy};

/// Knobs for the lifecycle engine.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub poll_interval: Duration,
    /// Max job runtime before forced failure; `None` disables the
    /// deadline.
    pub poll_timeout: Option<Duration>,
    pub forward_retry: RetryConfig,
    /// Probe remote results before accepting an immediate success,
    /// downgrading to failed when the probe fails.
    pub downgrade_on_verify_failure: bool,
    pub shutdown_grace: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_timeout: None,
            forward_retry: RetryConfig::default(),
            downgrade_on_verify_failure: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl From<&GatewayConfig> for JobManagerConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            forward_retry: config.forward_retry(),
            downgrade_on_verify_failure: config.downgrade_on_verify_failure,
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Result of a successful execute request.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub job: Job,
    pub status_info: StatusInfo,
    /// Root-relative `Location` header value.
    pub location: String,
}

/// Whether the poll loop should keep going after one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Continue,
    Stop(&'static str),
}

/// Tracks live poll tasks, at most one per job id.
///
/// The scheduler observer is the sole mutator of the task map. Shutdown
/// broadcasts a stop signal and awaits the tasks within a grace period.
pub struct PollCoordinator {
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    manager: OnceLock<Weak<JobManager>>,
    shutdown: broadcast::Sender<()>,
}

impl PollCoordinator {
    fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            tasks: Mutex::new(HashMap::new()),
            manager: OnceLock::new(),
            shutdown,
        }
    }

    fn bind(&self, manager: Weak<JobManager>) {
        let _ = self.manager.set(manager);
    }

    /// Spawn a poll loop for the job unless one is already live.
    pub async fn schedule(&self, job_id: Uuid) {
        let Some(manager) = self.manager.get().and_then(Weak::upgrade) else {
            return;
        };
        if manager.is_shutting_down() {
            tracing::debug!(%job_id, "not scheduling poll during shutdown");
            return;
        }

        let mut tasks = self.tasks.lock().await;
        if tasks.get(&job_id).is_some_and(|h| !h.is_finished()) {
            return;
        }
        tracing::debug!(%job_id, "scheduling poll loop");
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            manager.poll_loop(job_id, shutdown_rx).await;
        });
        tasks.insert(job_id, handle);
    }

    /// Cancel the poll task for a job, if any. Idempotent.
    pub async fn cancel(&self, job_id: Uuid) {
        if let Some(handle) = self.tasks.lock().await.remove(&job_id) {
            handle.abort();
        }
    }

    /// Number of live poll tasks.
    pub async fn live_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub async fn is_polling(&self, job_id: Uuid) -> bool {
        self.tasks
            .lock()
            .await
            .get(&job_id)
            .is_some_and(|h| !h.is_finished())
    }

    async fn shutdown_all(&self, grace: Duration) {
        let _ = self.shutdown.send(());
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().collect()
        };

        let deadline = Instant::now() + grace;
        for (job_id, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = handle.abort_handle();
            if tokio::time::timeout(remaining, handle).await.is_err() {
                tracing::warn!(%job_id, "poll task missed the grace deadline, aborting");
                abort.abort();
            }
        }
    }
}

pub struct JobManager {
    registry: Arc<ProviderRegistry>,
    http: Arc<dyn HttpClientPort>,
    repo: Arc<dyn JobRepository>,
    processes: Arc<ProcessManager>,
    deriver: StatusDeriver,
    forward_retry: RetryPolicy,
    /// Single-attempt policy: the poll loop supplies its own cadence.
    poll_retry: RetryPolicy,
    observers: ObserverBus,
    poller: Arc<PollCoordinator>,
    shutting_down: AtomicBool,
    config: JobManagerConfig,
}

impl JobManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: Arc<dyn HttpClientPort>,
        repo: Arc<dyn JobRepository>,
        processes: Arc<ProcessManager>,
        config: JobManagerConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            deriver: StatusDeriver::new(http.clone()),
            forward_retry: RetryPolicy::new(config.forward_retry.clone()),
            poll_retry: RetryPolicy::new(RetryConfig::single_attempt()),
            observers: ObserverBus::new(),
            poller: Arc::new(PollCoordinator::new()),
            shutting_down: AtomicBool::new(false),
            registry,
            http,
            repo,
            processes,
            config,
        });
        manager.poller.bind(Arc::downgrade(&manager));
        manager
    }

    pub fn poller(&self) -> Arc<PollCoordinator> {
        self.poller.clone()
    }

    pub fn register_observer(&self, observer: Arc<dyn JobObserver>) {
        self.observers.register(observer);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Create a local job and forward the execute request upstream.
    ///
    /// `headers` carries the caller's request headers with lowercased
    /// names, matching what the HTTP adapters produce.
    ///
    /// Pre-creation failures (unknown process, invalid input) are the
    /// only errors this returns. Once the job record exists the call
    /// succeeds with HTTP-201 semantics, carrying a failed snapshot when
    /// forwarding did not work out.
    pub async fn create_and_forward(
        &self,
        process_id: &str,
        payload: Value,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<ExecutionOutcome> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        if !payload.is_object() {
            return Err(GatewayError::InvalidInput(
                "execute body must be a JSON object".to_string(),
            ));
        }

        // Resolve before touching storage; this is where 404s happen.
        let descriptor = self.processes.get(process_id).await?;
        let canonical = descriptor
            .id()
            .and_then(|id| ProcessId::parse(id).ok())
            .ok_or_else(|| GatewayError::internal("descriptor left the pipeline without a canonical id"))?;
        let provider = self
            .registry
            .resolve(&canonical)
            .ok_or_else(|| GatewayError::ProcessNotFound(process_id.to_string()))?;

        let inputs = payload.get("inputs").cloned();
        let job = Job::new(canonical.clone(), inputs);
        let accepted_si = job.status_info.clone();
        self.repo.create(&job).await?;
        tracing::info!(job_id = %job.id, process = %canonical, "job created");
        self.observers.job_created(&job, &accepted_si).await;

        let exec_url = provider.execution_url(canonical.bare());
        let mut forward_headers = provider.auth_headers();
        if let Some(prefer) = headers.get("prefer") {
            forward_headers.insert("Prefer".to_string(), prefer.clone());
        }

        let outcome = self
            .forward_retry
            .execute(|| {
                self.http
                    .post(&exec_url, &payload, provider.timeout, &forward_headers)
            })
            .await;

        let job = match outcome {
            Ok(response) => {
                let derived = self
                    .deriver
                    .derive(&DerivationContext {
                        job: &job,
                        provider: &provider,
                        response: &response,
                    })
                    .await;
                self.apply_derived(job, &provider, derived).await?
            }
            Err(err) => {
                // Retry exhaustion on transport-level failures: the job
                // fails locally but the request still created it.
                tracing::warn!(job_id = %job.id, error = %err, "forwarding failed");
                let failed = self
                    .repo
                    .mark_failed(job.id, &format!("Failed to forward execution request: {err}"))
                    .await?
                    .ok_or_else(|| GatewayError::internal("job vanished while marking failed"))?;
                self.observers
                    .status_changed(&failed, Some(&accepted_si), &failed.status_info)
                    .await;
                self.observers
                    .job_completed(&failed, &failed.status_info)
                    .await;
                failed
            }
        };

        Ok(ExecutionOutcome {
            location: format!("/jobs/{}", job.id),
            status_info: job.status_info.clone(),
            job,
        })
    }

    /// Fill in the presentation fields a sparse upstream snapshot omits.
    fn enrich_snapshot(si: &mut StatusInfo) {
        match si.status {
            JobStatus::Running => {
                if si.progress.is_none() {
                    si.progress = Some(0);
                }
                if si.message.is_none() {
                    si.message = Some("Running".to_string());
                }
            }
            JobStatus::Successful => {
                if si.progress.is_none() {
                    si.progress = Some(100);
                }
                if si.message.is_none() {
                    si.message = Some("Completed".to_string());
                }
            }
            JobStatus::Failed => {
                if si.message.is_none() {
                    si.message = Some("Failed".to_string());
                }
            }
            JobStatus::Accepted | JobStatus::Dismissed => {}
        }
    }

    /// Apply a derived snapshot to a job: state machine enforcement,
    /// enrichment, persistence and observer dispatch.
    ///
    /// A snapshot identical to the current one (modulo `updated`) fires
    /// no observers and appends no history; only the in-memory `updated`
    /// timestamp moves.
    async fn apply_derived(
        &self,
        mut job: Job,
        provider: &Provider,
        mut derived: Derived,
    ) -> GatewayResult<Job> {
        if job.is_terminal() && derived.status_info.status != job.status {
            tracing::warn!(
                job_id = %job.id,
                from = job.status.as_str(),
                to = derived.status_info.status.as_str(),
                "ignoring snapshot claiming a transition out of a terminal state"
            );
            return Ok(job);
        }

        // Downgrade policy: an immediate success is only accepted once
        // the remote results respond. Runs before the snapshot is
        // applied, while the transition to failed is still legal.
        if self.config.downgrade_on_verify_failure
            && derived.status_info.status == JobStatus::Successful
            && derived.outputs.is_none()
        {
            let remote_id = derived
                .remote_job_id
                .clone()
                .or_else(|| job.remote_job_id.clone());
            if let Some(remote_id) = remote_id {
                if !self.verify_remote_results(provider, &remote_id).await {
                    tracing::warn!(job_id = %job.id, "results probe failed, downgrading to failed");
                    derived.status_info = StatusInfo::failed(
                        job.id,
                        &job.process_id,
                        "Result fetch failed after remote success",
                    );
                }
            }
        }

        let old = job.status_info.clone();
        let mut fields_changed = false;
        if let Some(remote_id) = derived.remote_job_id {
            if job.remote_job_id.is_none() {
                job.remote_job_id = Some(remote_id);
                fields_changed = true;
            }
        }
        if let Some(url) = derived.remote_status_url {
            if job.remote_status_url.as_deref() != Some(url.as_str()) {
                job.remote_status_url = Some(url);
                fields_changed = true;
            }
        }
        if let Some(outputs) = derived.outputs {
            job.results = Some(outputs);
            fields_changed = true;
        }
        if let Some(diagnostic) = derived.diagnostic {
            tracing::debug!(job_id = %job.id, %diagnostic, "derivation diagnostic");
        }

        let mut si = derived.status_info;
        Self::enrich_snapshot(&mut si);

        match job.apply_status_info(si) {
            Ok(()) => {}
            Err(GatewayError::InvalidTransition { from, to }) => {
                tracing::warn!(job_id = %job.id, %from, %to, "ignoring invalid transition");
                return Ok(job);
            }
            Err(err) => return Err(err),
        }
        job.status_info.ensure_self_link(job.id);
        job.status_info.ensure_results_link(job.id);

        let changed = !job.status_info.observed_eq(&old);
        if changed || fields_changed {
            self.repo.update(&job).await?;
        }
        if changed {
            let new_snapshot = job.status_info.clone();
            self.observers
                .status_changed(&job, Some(&old), &new_snapshot)
                .await;
            if job.is_terminal() {
                tracing::info!(job_id = %job.id, status = job.status.as_str(), "job reached terminal state");
                self.observers.job_completed(&job, &new_snapshot).await;
            }
        }
        Ok(job)
    }

    async fn verify_remote_results(&self, provider: &Provider, remote_job_id: &str) -> bool {
        let url = provider.remote_results_url(remote_job_id);
        match self
            .http
            .get(&url, provider.timeout, &provider.auth_headers())
            .await
        {
            Ok(response) => response.is_success(),
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "results verification fetch failed");
                false
            }
        }
    }

    /// One poll iteration for a job. Driven by the poll loop.
    pub async fn poll_once(&self, job_id: Uuid) -> GatewayResult<PollState> {
        let Some(job) = self.repo.get(job_id).await? else {
            return Ok(PollState::Stop("job deleted"));
        };
        if job.is_terminal() {
            return Ok(PollState::Stop("terminal state reached"));
        }
        let Some(url) = job.remote_status_url.clone() else {
            return Ok(PollState::Stop("no remote status url"));
        };

        if self.check_poll_timeout(&job).await? {
            return Ok(PollState::Stop("poll timeout exceeded"));
        }

        let Some(provider) = self.registry.get(&job.provider_name) else {
            tracing::warn!(job_id = %job.id, provider = %job.provider_name, "provider no longer configured");
            return Ok(PollState::Stop("provider removed"));
        };

        let poll_headers = provider.auth_headers();
        let outcome = self
            .poll_retry
            .execute(|| self.http.get(&url, provider.timeout, &poll_headers))
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                // Poll fetch errors never fail the job; the next tick
                // tries again.
                tracing::debug!(job_id = %job.id, error = %err, "poll fetch failed");
                return Ok(PollState::Continue);
            }
        };

        if !response.is_success() || !poll_derivable(&response) {
            tracing::debug!(
                job_id = %job.id,
                status = response.status,
                "poll response carries no status document"
            );
            return Ok(PollState::Continue);
        }

        let derived = self
            .deriver
            .derive(&DerivationContext {
                job: &job,
                provider: &provider,
                response: &response,
            })
            .await;
        let job = self.apply_derived(job, &provider, derived).await?;

        if job.is_terminal() {
            Ok(PollState::Stop("terminal state reached"))
        } else {
            Ok(PollState::Continue)
        }
    }

    /// Forced failure when a job outlives the configured deadline.
    /// Returns true when the deadline fired.
    async fn check_poll_timeout(&self, job: &Job) -> GatewayResult<bool> {
        let Some(limit) = self.config.poll_timeout else {
            return Ok(false);
        };
        let elapsed = (Utc::now() - job.created)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if elapsed <= limit {
            return Ok(false);
        }

        tracing::warn!(
            job_id = %job.id,
            elapsed_s = elapsed.as_secs(),
            limit_s = limit.as_secs(),
            "poll timeout reached, forcing failure"
        );
        let old = job.status_info.clone();
        let failed = self
            .repo
            .mark_failed(
                job.id,
                &format!(
                    "Timed out after {}s waiting for remote completion",
                    limit.as_secs()
                ),
            )
            .await?;
        if let Some(failed) = failed {
            self.observers
                .status_changed(&failed, Some(&old), &failed.status_info)
                .await;
            self.observers
                .job_completed(&failed, &failed.status_info)
                .await;
        }
        Ok(true)
    }

    /// Background loop polling one job until a terminal condition.
    async fn poll_loop(self: Arc<Self>, job_id: Uuid, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            if self.is_shutting_down() {
                tracing::debug!(%job_id, "poll loop stopping: shutdown");
                return;
            }
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!(%job_id, "poll loop stopping: shutdown signal");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            match self.poll_once(job_id).await {
                Ok(PollState::Continue) => {}
                Ok(PollState::Stop(reason)) => {
                    tracing::debug!(%job_id, reason, "poll loop stopping");
                    return;
                }
                Err(err) => {
                    // Storage hiccups are retried on the next tick.
                    tracing::debug!(%job_id, error = %err, "poll iteration failed");
                }
            }
        }
    }

    pub async fn get_job(&self, job_id: Uuid) -> GatewayResult<Job> {
        self.repo
            .get(job_id)
            .await?
            .ok_or(GatewayError::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> GatewayResult<Vec<Job>> {
        self.repo.list(filter).await
    }

    /// Results for a successful job: locally captured outputs when the
    /// upstream answered synchronously, a proxied fetch otherwise.
    pub async fn get_results(&self, job_id: Uuid) -> GatewayResult<Value> {
        let job = self.get_job(job_id).await?;
        if job.status != JobStatus::Successful {
            return Err(GatewayError::Conflict(format!(
                "results are not available while the job is {}",
                job.status.as_str()
            )));
        }
        if let Some(results) = &job.results {
            return Ok(results.clone());
        }

        let provider = self.registry.get(&job.provider_name).ok_or_else(|| {
            GatewayError::internal(format!("provider '{}' no longer configured", job.provider_name))
        })?;
        let remote_job_id = job.remote_job_id.as_deref().ok_or_else(|| {
            GatewayError::Conflict("job completed without retrievable results".to_string())
        })?;

        let url = provider.remote_results_url(remote_job_id);
        let headers = provider.auth_headers();
        let response = self
            .forward_retry
            .execute(|| self.http.get(&url, provider.timeout, &headers))
            .await?;
        if !response.is_success() {
            return Err(GatewayError::BadGateway(format!(
                "results fetch returned HTTP {}",
                response.status
            )));
        }
        match response.json() {
            Some(value) => Ok(value.clone()),
            None => Ok(Value::String(response.body_excerpt())),
        }
    }

    /// Stop accepting work, cancel poll tasks and release the HTTP pool.
    /// In-flight `create_and_forward` calls run to completion.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("job manager shutting down");
        self.poller.shutdown_all(self.config.shutdown_grace).await;
        self.http.close().await;
    }
}
