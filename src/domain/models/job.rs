//! Job domain model.
//!
//! A job is the local record of one forwarded execution request. Its id is
//! minted locally and is the only identifier ever shown to callers; the
//! upstream job id is tracked separately and never leaves the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::process_id::ProcessId;

/// Status of a job in the OGC Processes lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is persisted locally, forward not yet acknowledged
    Accepted,
    /// Upstream reported the job as executing
    Running,
    /// Terminal: completed with results
    Successful,
    /// Terminal: failed locally or upstream
    Failed,
    /// Terminal: dismissed on request
    Dismissed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Dismissed => "dismissed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Dismissed)
    }

    /// Valid transitions from this status. Terminal states admit none.
    pub fn valid_transitions(&self) -> Vec<JobStatus> {
        match self {
            Self::Accepted => vec![
                Self::Running,
                Self::Successful,
                Self::Failed,
                Self::Dismissed,
            ],
            Self::Running => vec![Self::Successful, Self::Failed, Self::Dismissed],
            Self::Successful | Self::Failed | Self::Dismissed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A hyperlink in the OGC link relation shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: rel.into(),
            media_type: Some("application/json".to_string()),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Local self link for a job.
    pub fn job_self(job_id: Uuid) -> Self {
        Self::new(format!("/jobs/{job_id}"), "self").with_title("Job status")
    }

    /// Local results link for a job.
    pub fn job_results(job_id: Uuid) -> Self {
        Self::new(format!("/jobs/{job_id}/results"), "results").with_title("Job results")
    }
}

/// The OGC canonical status document.
///
/// `job_id` always carries the local job id; remote identifiers are
/// normalized away before a snapshot is persisted or returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    #[serde(rename = "processID", skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(rename = "type", default = "process_doc_type")]
    pub kind: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

fn process_doc_type() -> String {
    "process".to_string()
}

impl StatusInfo {
    /// Bare snapshot with no timestamps; callers fill in what they know.
    pub fn new(job_id: Uuid, process_id: &ProcessId, status: JobStatus) -> Self {
        Self {
            process_id: Some(process_id.to_string()),
            kind: process_doc_type(),
            job_id: job_id.to_string(),
            status,
            message: None,
            created: None,
            started: None,
            finished: None,
            updated: None,
            progress: None,
            links: Vec::new(),
        }
    }

    /// Initial snapshot persisted when a job is created.
    pub fn accepted(job_id: Uuid, process_id: &ProcessId, created: DateTime<Utc>) -> Self {
        let mut si = Self::new(job_id, process_id, JobStatus::Accepted);
        si.created = Some(created);
        si.updated = Some(created);
        si.progress = Some(0);
        si.links = vec![Link::job_self(job_id)];
        si
    }

    /// Terminal failure snapshot with a human-readable diagnostic.
    ///
    /// Carries no timestamps; the caller injects them when the snapshot is
    /// applied to a job.
    pub fn failed(job_id: Uuid, process_id: &ProcessId, message: impl Into<String>) -> Self {
        let mut si = Self::new(job_id, process_id, JobStatus::Failed);
        si.message = Some(message.into());
        si
    }

    /// Compare two snapshots ignoring the `updated` timestamp, which is
    /// refreshed on every poll even when nothing else changed.
    pub fn observed_eq(&self, other: &StatusInfo) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.updated = None;
        b.updated = None;
        a == b
    }

    /// Guarantee a local self link, dropping self/results links that point
    /// at a foreign job id.
    pub fn ensure_self_link(&mut self, job_id: Uuid) {
        let local = format!("/jobs/{job_id}");
        self.links.retain(|l| {
            !matches!(l.rel.as_str(), "self" | "results") || l.href.contains(&local)
        });
        if !self.links.iter().any(|l| l.rel == "self") {
            self.links.push(Link::job_self(job_id));
        }
    }

    /// Guarantee a local results link on successful snapshots.
    pub fn ensure_results_link(&mut self, job_id: Uuid) {
        if self.status != JobStatus::Successful {
            return;
        }
        if !self.links.iter().any(|l| l.rel == "results") {
            self.links.push(Link::job_results(job_id));
        }
    }
}

/// Local record of a forwarded execution request.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Locally minted id; the sole public identifier.
    pub id: Uuid,
    /// Canonical `{provider}:{bare_id}` of the executed process.
    pub process_id: ProcessId,
    /// Name of the provider the job was forwarded to.
    pub provider_name: String,
    /// Upstream job id, if the provider reported one. Never exposed.
    pub remote_job_id: Option<String>,
    /// Absolute URL to poll for upstream status, if known.
    pub remote_status_url: Option<String>,
    /// Current status code.
    pub status: JobStatus,
    /// Current status snapshot.
    pub status_info: StatusInfo,
    /// Opaque copy of the execute request inputs. Never embedded in
    /// `status_info`.
    pub inputs: Option<Value>,
    /// Outputs captured from an immediate (synchronous) upstream response.
    pub results: Option<Value>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl Job {
    /// Create a new job in `accepted` state with a fresh local id.
    ///
    /// Local id minting intentionally decouples job identity from any
    /// remote id: references stay stable even if the upstream retries or
    /// reassigns identifiers, and ids cannot collide across providers.
    pub fn new(process_id: ProcessId, inputs: Option<Value>) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let status_info = StatusInfo::accepted(id, &process_id, now);
        Self {
            id,
            provider_name: process_id.provider().to_string(),
            process_id,
            remote_job_id: None,
            remote_status_url: None,
            status: JobStatus::Accepted,
            status_info,
            inputs,
            results: None,
            created: now,
            started: None,
            finished: None,
            updated: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a derived snapshot, enforcing the state machine and keeping
    /// job and snapshot timestamps consistent.
    ///
    /// The snapshot's identity fields are normalized to this job before it
    /// is stored. Transitions out of terminal states are rejected.
    pub fn apply_status_info(&mut self, mut si: StatusInfo) -> GatewayResult<()> {
        if si.status != self.status && !self.status.can_transition_to(si.status) {
            return Err(GatewayError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: si.status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        si.job_id = self.id.to_string();
        si.process_id = Some(self.process_id.to_string());
        si.created = Some(self.created);

        if si.status != JobStatus::Accepted {
            self.started = si.started.or(self.started).or(Some(now));
        }
        if si.status.is_terminal() {
            self.finished = si.finished.or(self.finished).or(Some(now));
        }
        si.started = self.started;
        si.finished = self.finished;

        self.updated = now;
        si.updated = Some(now);

        self.status = si.status;
        self.status_info = si;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_process_id() -> ProcessId {
        ProcessId::new("ms1", "square").unwrap()
    }

    #[test]
    fn new_job_is_accepted_without_start_or_finish() {
        let job = Job::new(test_process_id(), None);
        assert_eq!(job.status, JobStatus::Accepted);
        assert!(job.started.is_none());
        assert!(job.finished.is_none());
        assert_eq!(job.status_info.job_id, job.id.to_string());
        assert!(job.status_info.links.iter().any(|l| l.rel == "self"));
    }

    #[test]
    fn accepted_to_running_sets_started() {
        let mut job = Job::new(test_process_id(), None);
        let mut si = job.status_info.clone();
        si.status = JobStatus::Running;
        job.apply_status_info(si).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started.is_some());
        assert!(job.finished.is_none());
    }

    #[test]
    fn terminal_sets_finished_after_started_after_created() {
        let mut job = Job::new(test_process_id(), None);
        let mut si = job.status_info.clone();
        si.status = JobStatus::Successful;
        job.apply_status_info(si).unwrap();
        let started = job.started.unwrap();
        let finished = job.finished.unwrap();
        assert!(job.created <= started);
        assert!(started <= finished);
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut job = Job::new(test_process_id(), None);
        let mut si = job.status_info.clone();
        si.status = JobStatus::Failed;
        job.apply_status_info(si).unwrap();

        let mut back_to_running = job.status_info.clone();
        back_to_running.status = JobStatus::Running;
        assert!(job.apply_status_info(back_to_running).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn remote_job_id_is_normalized_to_local() {
        let mut job = Job::new(test_process_id(), None);
        let mut si = job.status_info.clone();
        si.status = JobStatus::Running;
        si.job_id = "r-99".to_string();
        job.apply_status_info(si).unwrap();
        assert_eq!(job.status_info.job_id, job.id.to_string());
    }

    #[test]
    fn observed_eq_ignores_updated_only() {
        let job = Job::new(test_process_id(), None);
        let mut a = job.status_info.clone();
        let mut b = a.clone();
        b.updated = Some(Utc::now());
        assert!(a.observed_eq(&b));
        a.progress = Some(50);
        assert!(!a.observed_eq(&b));
    }

    #[test]
    fn ensure_self_link_drops_foreign_links() {
        let job = Job::new(test_process_id(), None);
        let mut si = job.status_info.clone();
        si.links = vec![
            Link::new("http://ms1/jobs/r-99", "self"),
            Link::new("http://ms1/jobs/r-99/results", "results"),
            Link::new("http://ms1/docs", "describedby"),
        ];
        si.ensure_self_link(job.id);
        assert!(si.links.iter().any(|l| l.rel == "describedby"));
        assert_eq!(
            si.links.iter().filter(|l| l.rel == "self").count(),
            1,
            "exactly one local self link"
        );
        assert!(si
            .links
            .iter()
            .all(|l| l.rel != "self" || l.href.contains(&job.id.to_string())));
    }

    #[test]
    fn status_info_serializes_with_ogc_field_names() {
        let job = Job::new(test_process_id(), None);
        let value = serde_json::to_value(&job.status_info).unwrap();
        assert_eq!(value["jobID"], job.id.to_string());
        assert_eq!(value["processID"], "ms1:square");
        assert_eq!(value["type"], "process");
        assert_eq!(value["status"], "accepted");
    }
}
