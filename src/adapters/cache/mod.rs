//! Two-tier TTL cache for process metadata.
//!
//! Tier one caches a provider's whole process list; tier two caches
//! individual descriptors keyed by canonical id, with a secondary index
//! from bare id to the canonical ids that carry it so unqualified lookups
//! can be served. The index is pruned together with descriptor eviction,
//! so a bare id can never resolve to a descriptor the canonical key no
//! longer has.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::RwLock;

use crate::domain::models::{ProcessDescriptor, ProcessId, ProcessSummary};

/// Default TTL matching `UMP_PROCESS_CACHE_TTL_S`.
const DEFAULT_TTL_SECS: u64 = 60;

const LIST_CACHE_CAPACITY: u64 = 256;
const DESCRIPTOR_CACHE_CAPACITY: u64 = 4096;

pub struct ProcessCache {
    /// Provider name -> process summaries.
    lists: Cache<String, Arc<Vec<ProcessSummary>>>,
    /// Canonical id -> descriptor.
    descriptors: Cache<String, Arc<ProcessDescriptor>>,
    /// Bare id -> canonical ids, in first-seen order.
    bare_index: RwLock<HashMap<String, Vec<String>>>,
}

impl ProcessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            lists: Cache::builder()
                .max_capacity(LIST_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
            descriptors: Cache::builder()
                .max_capacity(DESCRIPTOR_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
            bare_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }

    pub async fn get_list(&self, provider: &str) -> Option<Arc<Vec<ProcessSummary>>> {
        self.lists.get(provider).await
    }

    pub async fn put_list(&self, provider: &str, summaries: Vec<ProcessSummary>) {
        self.lists
            .insert(provider.to_string(), Arc::new(summaries))
            .await;
    }

    pub async fn get_descriptor(&self, id: &ProcessId) -> Option<Arc<ProcessDescriptor>> {
        self.descriptors.get(&id.to_string()).await
    }

    /// Serve an unqualified lookup. Candidates are consulted in the order
    /// their canonical entries were first cached; expired entries are
    /// skipped (and lazily pruned from the index).
    pub async fn get_by_bare(&self, bare: &str) -> Option<Arc<ProcessDescriptor>> {
        let candidates = {
            let index = self.bare_index.read().await;
            index.get(bare)?.clone()
        };

        let mut live = None;
        for canonical in &candidates {
            if let Some(descriptor) = self.descriptors.get(canonical).await {
                live = Some(descriptor);
                break;
            }
        }

        if live.is_none() {
            let mut index = self.bare_index.write().await;
            index.remove(bare);
        }
        live
    }

    /// Write-through on both tiers of the descriptor cache.
    pub async fn put_descriptor(&self, id: &ProcessId, descriptor: ProcessDescriptor) {
        let canonical = id.to_string();
        self.descriptors
            .insert(canonical.clone(), Arc::new(descriptor))
            .await;

        let mut index = self.bare_index.write().await;
        let entry = index.entry(id.bare().to_string()).or_default();
        if !entry.contains(&canonical) {
            entry.push(canonical);
        }
    }

    /// Evict a descriptor and its bare-id index entry together.
    pub async fn invalidate_descriptor(&self, id: &ProcessId) {
        let canonical = id.to_string();
        self.descriptors.invalidate(&canonical).await;

        let mut index = self.bare_index.write().await;
        if let Some(entry) = index.get_mut(id.bare()) {
            entry.retain(|c| c != &canonical);
            if entry.is_empty() {
                index.remove(id.bare());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(id: &str) -> ProcessDescriptor {
        match json!({"id": id, "title": "t"}) {
            serde_json::Value::Object(map) => ProcessDescriptor::new(map),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn descriptor_served_by_canonical_and_bare_id() {
        let cache = ProcessCache::with_default_ttl();
        let id = ProcessId::new("ms1", "square").unwrap();
        cache.put_descriptor(&id, descriptor("ms1:square")).await;

        assert!(cache.get_descriptor(&id).await.is_some());
        let by_bare = cache.get_by_bare("square").await.unwrap();
        assert_eq!(by_bare.id(), Some("ms1:square"));
    }

    #[tokio::test]
    async fn bare_lookup_prefers_first_cached_provider() {
        let cache = ProcessCache::with_default_ttl();
        let first = ProcessId::new("ms1", "square").unwrap();
        let second = ProcessId::new("ms2", "square").unwrap();
        cache.put_descriptor(&first, descriptor("ms1:square")).await;
        cache.put_descriptor(&second, descriptor("ms2:square")).await;

        let hit = cache.get_by_bare("square").await.unwrap();
        assert_eq!(hit.id(), Some("ms1:square"));
    }

    #[tokio::test]
    async fn invalidation_removes_both_keys() {
        let cache = ProcessCache::with_default_ttl();
        let id = ProcessId::new("ms1", "square").unwrap();
        cache.put_descriptor(&id, descriptor("ms1:square")).await;
        cache.invalidate_descriptor(&id).await;

        assert!(cache.get_descriptor(&id).await.is_none());
        assert!(cache.get_by_bare("square").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = ProcessCache::new(Duration::from_millis(20));
        let id = ProcessId::new("ms1", "square").unwrap();
        cache.put_descriptor(&id, descriptor("ms1:square")).await;
        cache.put_list("ms1", Vec::new()).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get_descriptor(&id).await.is_none());
        assert!(cache.get_by_bare("square").await.is_none());
        assert!(cache.get_list("ms1").await.is_none());
    }
}
