//! Provider registry.
//!
//! Holds the configured upstream providers as an immutable snapshot
//! behind an atomically swappable pointer. Readers clone the snapshot
//! Arc and keep a consistent view even while a reload replaces the
//! registry underneath them. File order is registry order, which is also
//! the tie-break order for bare process id lookups.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::process_id::ProcessId;
use crate::domain::models::{AuthSpec, ProcessPolicy, Provider};

/// Shape of the providers YAML file.
#[derive(Debug, Deserialize)]
pub struct ProvidersFile {
    pub providers: Vec<ProviderSpec>,
}

/// One provider entry in the file.
#[derive(Debug, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessPolicy>,
}

impl ProviderSpec {
    fn into_provider(self, default_timeout: Duration) -> GatewayResult<Provider> {
        // The name doubles as the canonical id prefix, so it must satisfy
        // the id component grammar.
        ProcessId::new(&self.name, "probe")?;
        let base_url = Url::parse(&self.url).map_err(|e| {
            GatewayError::InvalidInput(format!("provider '{}': bad url: {e}", self.name))
        })?;
        Ok(Provider {
            name: self.name,
            base_url,
            auth: self.auth,
            timeout: self
                .timeout_s
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            processes: self.processes,
        })
    }
}

pub struct ProviderRegistry {
    snapshot: RwLock<Arc<Vec<Arc<Provider>>>>,
    default_timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>, default_timeout: Duration) -> GatewayResult<Self> {
        let registry = Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            default_timeout,
        };
        registry.replace(providers)?;
        Ok(registry)
    }

    /// Parse the providers YAML and build a registry.
    pub fn from_file(path: &Path, default_timeout: Duration) -> GatewayResult<Self> {
        let providers = Self::parse_file(path, default_timeout)?;
        Self::new(providers, default_timeout)
    }

    fn parse_file(path: &Path, default_timeout: Duration) -> GatewayResult<Vec<Provider>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::InvalidInput(format!("cannot read providers file {path:?}: {e}"))
        })?;
        let file: ProvidersFile = serde_yaml::from_str(&raw).map_err(|e| {
            GatewayError::InvalidInput(format!("cannot parse providers file {path:?}: {e}"))
        })?;
        file.providers
            .into_iter()
            .map(|spec| spec.into_provider(default_timeout))
            .collect()
    }

    /// Atomically swap in a new provider set. In-flight readers keep the
    /// snapshot they already hold.
    pub fn replace(&self, providers: Vec<Provider>) -> GatewayResult<()> {
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name.clone()) {
                return Err(GatewayError::InvalidInput(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        let next = Arc::new(providers.into_iter().map(Arc::new).collect::<Vec<_>>());
        *self.snapshot.write().expect("registry lock poisoned") = next;
        Ok(())
    }

    /// Re-read the providers file and swap the snapshot.
    pub fn reload_from_file(&self, path: &Path) -> GatewayResult<()> {
        let providers = Self::parse_file(path, self.default_timeout)?;
        self.replace(providers)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.list().iter().find(|p| p.name == name).cloned()
    }

    /// Current snapshot, in registry order.
    pub fn list(&self) -> Arc<Vec<Arc<Provider>>> {
        self.snapshot.read().expect("registry lock poisoned").clone()
    }

    pub fn resolve(&self, id: &ProcessId) -> Option<Arc<Provider>> {
        self.get(id.provider())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDERS_YAML: &str = r#"
providers:
  - name: ms1
    url: http://ms1.example/api
    timeout_s: 30
    processes:
      square:
        anonymous: true
      hidden:
        excluded: true
  - name: ms2
    url: http://ms2.example
    auth:
      type: bearer
      token: secret
"#;

    fn registry() -> ProviderRegistry {
        let file: ProvidersFile = serde_yaml::from_str(PROVIDERS_YAML).unwrap();
        let providers = file
            .providers
            .into_iter()
            .map(|s| s.into_provider(Duration::from_secs(60)).unwrap())
            .collect();
        ProviderRegistry::new(providers, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn parses_providers_in_file_order() {
        let registry = registry();
        let names: Vec<_> = registry.list().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["ms1", "ms2"]);
    }

    #[test]
    fn per_provider_timeout_overrides_default() {
        let registry = registry();
        assert_eq!(registry.get("ms1").unwrap().timeout, Duration::from_secs(30));
        assert_eq!(registry.get("ms2").unwrap().timeout, Duration::from_secs(60));
    }

    #[test]
    fn resolve_maps_canonical_id_to_provider() {
        let registry = registry();
        let id = ProcessId::new("ms1", "square").unwrap();
        assert_eq!(registry.resolve(&id).unwrap().name, "ms1");
        let unknown = ProcessId::new("ms9", "square").unwrap();
        assert!(registry.resolve(&unknown).is_none());
    }

    #[test]
    fn replace_swaps_atomically_and_rejects_duplicates() {
        let registry = registry();
        let held = registry.list();

        let replacement = Provider {
            name: "ms3".to_string(),
            base_url: Url::parse("http://ms3.example").unwrap(),
            auth: None,
            timeout: Duration::from_secs(60),
            processes: BTreeMap::new(),
        };
        registry.replace(vec![replacement.clone()]).unwrap();

        // The held snapshot is unchanged; new readers see the swap.
        assert_eq!(held.len(), 2);
        assert_eq!(registry.list().len(), 1);

        assert!(registry
            .replace(vec![replacement.clone(), replacement])
            .is_err());
    }

    #[test]
    fn invalid_provider_name_is_rejected() {
        let spec = ProviderSpec {
            name: "bad name".to_string(),
            url: "http://x.example".to_string(),
            timeout_s: None,
            auth: None,
            processes: BTreeMap::new(),
        };
        assert!(spec.into_provider(Duration::from_secs(60)).is_err());
    }
}
