//! Provider domain model.
//!
//! A provider is one upstream OGC API Processes service federated behind
//! the gateway. Instances are immutable snapshots; configuration reloads
//! swap whole registry snapshots rather than mutating providers in place.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Where results of a process end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStorage {
    /// Results stay on the provider; the gateway proxies them.
    Remote,
    /// Results are mirrored into local storage by an external adapter.
    Local,
}

impl Default for ResultStorage {
    fn default() -> Self {
        Self::Remote
    }
}

/// Per-process policy attached to a provider configuration entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessPolicy {
    /// Hidden from discovery and execution.
    pub excluded: bool,
    /// Visible and runnable without authentication.
    pub anonymous: bool,
    /// Same inputs always produce the same outputs.
    pub deterministic: bool,
    pub result_storage: ResultStorage,
    /// Opaque rendering hints consumed by downstream tooling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_props: Option<Value>,
}

/// Credentials forwarded on upstream requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSpec {
    Bearer { token: String },
    Header { name: String, value: String },
}

impl AuthSpec {
    /// Merge the credential into an outbound header map.
    pub fn apply(&self, headers: &mut HashMap<String, String>) {
        match self {
            Self::Bearer { token } => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}

/// An upstream process provider. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    /// Unique name; doubles as the canonical id prefix.
    pub name: String,
    pub base_url: Url,
    pub auth: Option<AuthSpec>,
    /// Per-call timeout for requests against this provider.
    pub timeout: Duration,
    /// Configured processes keyed by bare id.
    pub processes: BTreeMap<String, ProcessPolicy>,
}

impl Provider {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    pub fn processes_url(&self) -> String {
        self.endpoint("processes")
    }

    pub fn process_url(&self, bare_id: &str) -> String {
        self.endpoint(&format!("processes/{bare_id}"))
    }

    pub fn execution_url(&self, bare_id: &str) -> String {
        self.endpoint(&format!("processes/{bare_id}/execution"))
    }

    pub fn remote_results_url(&self, remote_job_id: &str) -> String {
        self.endpoint(&format!("jobs/{remote_job_id}/results"))
    }

    pub fn policy(&self, bare_id: &str) -> Option<&ProcessPolicy> {
        self.processes.get(bare_id)
    }

    /// Bare ids of processes that participate in federation.
    pub fn visible_process_ids(&self) -> impl Iterator<Item = &str> {
        self.processes
            .iter()
            .filter(|(_, policy)| !policy.excluded)
            .map(|(id, _)| id.as_str())
    }

    /// Auth headers for outbound calls against this provider.
    pub fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(auth) = &self.auth {
            auth.apply(&mut headers);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Provider {
        let mut processes = BTreeMap::new();
        processes.insert("square".to_string(), ProcessPolicy::default());
        processes.insert(
            "hidden".to_string(),
            ProcessPolicy {
                excluded: true,
                ..Default::default()
            },
        );
        Provider {
            name: "ms1".to_string(),
            base_url: Url::parse("http://ms1.example/api/").unwrap(),
            auth: None,
            timeout: Duration::from_secs(60),
            processes,
        }
    }

    #[test]
    fn endpoints_normalize_trailing_slash() {
        let p = provider();
        assert_eq!(p.processes_url(), "http://ms1.example/api/processes");
        assert_eq!(
            p.execution_url("square"),
            "http://ms1.example/api/processes/square/execution"
        );
    }

    #[test]
    fn excluded_processes_are_not_visible() {
        let p = provider();
        let visible: Vec<_> = p.visible_process_ids().collect();
        assert_eq!(visible, vec!["square"]);
    }

    #[test]
    fn auth_spec_merges_headers() {
        let mut headers = HashMap::new();
        AuthSpec::Bearer {
            token: "tok".to_string(),
        }
        .apply(&mut headers);
        assert_eq!(headers["Authorization"], "Bearer tok");
    }
}
