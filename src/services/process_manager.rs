//! Process discovery across federated providers.
//!
//! Fans out to every configured provider for listings, resolves
//! canonical and bare ids to descriptors, and keeps the two-tier cache
//! warm. Provider failures during the fan-out are isolated: a dead
//! provider contributes an empty list instead of failing the request.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::adapters::cache::ProcessCache;
use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::{ProcessDescriptor, ProcessId, ProcessSummary, Provider};
use crate::domain::ports::HttpClientPort;
use crate::services::pipeline::ProcessPipeline;
use crate::services::registry::ProviderRegistry;

pub struct ProcessManager {
    registry: Arc<ProviderRegistry>,
    http: Arc<dyn HttpClientPort>,
    cache: Arc<ProcessCache>,
    pipeline: ProcessPipeline,
}

impl ProcessManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: Arc<dyn HttpClientPort>,
        cache: Arc<ProcessCache>,
        pipeline: ProcessPipeline,
    ) -> Self {
        Self {
            registry,
            http,
            cache,
            pipeline,
        }
    }

    /// List every federated process, in registry order.
    ///
    /// Providers without a fresh list cache entry are fetched
    /// concurrently; one provider failing (or timing out) does not abort
    /// the rest.
    pub async fn list_all(&self) -> Vec<ProcessSummary> {
        let providers = self.registry.list();

        enum Pending {
            Cached(Arc<Vec<ProcessSummary>>),
            Fetching(JoinHandle<GatewayResult<Vec<ProcessSummary>>>, String),
        }

        let mut pending = Vec::with_capacity(providers.len());
        for provider in providers.iter() {
            if let Some(cached) = self.cache.get_list(&provider.name).await {
                pending.push(Pending::Cached(cached));
                continue;
            }
            let provider = provider.clone();
            let http = self.http.clone();
            let pipeline = self.pipeline.clone();
            let name = provider.name.clone();
            let handle =
                tokio::spawn(
                    async move { fetch_provider_list(&provider, http, &pipeline).await },
                );
            pending.push(Pending::Fetching(handle, name));
        }

        let mut all = Vec::new();
        for entry in pending {
            match entry {
                Pending::Cached(summaries) => all.extend(summaries.iter().cloned()),
                Pending::Fetching(handle, name) => match handle.await {
                    Ok(Ok(summaries)) => {
                        self.cache.put_list(&name, summaries.clone()).await;
                        all.extend(summaries);
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(provider = %name, error = %err, "provider listing failed");
                        self.cache.put_list(&name, Vec::new()).await;
                    }
                    Err(err) => {
                        tracing::warn!(provider = %name, error = %err, "provider listing task died");
                    }
                },
            }
        }
        all
    }

    /// Fetch a descriptor by canonical or bare id.
    ///
    /// Bare ids resolve by first match in registry order; when the
    /// descriptor endpoint of the matched provider fails, the descriptor
    /// is synthesized from the listing summary rather than erroring.
    pub async fn get(&self, id: &str) -> GatewayResult<ProcessDescriptor> {
        if let Some(provider_name) = ProcessId::extract_provider(id) {
            let pid = ProcessId::parse(id)?;
            if let Some(cached) = self.cache.get_descriptor(&pid).await {
                tracing::debug!(process = %pid, "descriptor cache hit");
                return Ok((*cached).clone());
            }
            let provider = self
                .registry
                .get(provider_name)
                .ok_or_else(|| GatewayError::ProcessNotFound(id.to_string()))?;
            if provider.policy(pid.bare()).is_some_and(|p| p.excluded) {
                return Err(GatewayError::ProcessNotFound(id.to_string()));
            }
            return self.fetch_descriptor(&provider, &pid).await;
        }

        self.get_by_bare(id).await
    }

    async fn get_by_bare(&self, bare: &str) -> GatewayResult<ProcessDescriptor> {
        // The bare half must satisfy the same grammar as a canonical id.
        ProcessId::new("probe", bare)?;

        if let Some(cached) = self.cache.get_by_bare(bare).await {
            tracing::debug!(process = %bare, "bare descriptor cache hit");
            return Ok((*cached).clone());
        }

        for provider in self.registry.list().iter() {
            let summaries = match self.provider_listing(provider).await {
                Ok(summaries) => summaries,
                Err(err) => {
                    tracing::warn!(provider = %provider.name, error = %err, "skipping provider during bare id search");
                    continue;
                }
            };

            let matched = summaries.iter().any(|s| {
                s.id()
                    .and_then(|id| ProcessId::parse(id).ok())
                    .is_some_and(|pid| pid.bare() == bare)
            });
            if !matched {
                continue;
            }

            let pid = ProcessId::new(&provider.name, bare)?;
            match self.fetch_descriptor(provider, &pid).await {
                Ok(descriptor) => return Ok(descriptor),
                Err(err) => {
                    // Listing says the process exists; serve the summary
                    // rather than failing the lookup.
                    tracing::warn!(
                        process = %pid,
                        error = %err,
                        "descriptor endpoint failed, synthesizing from summary"
                    );
                    let summary = summaries
                        .iter()
                        .find(|s| {
                            s.id()
                                .and_then(|id| ProcessId::parse(id).ok())
                                .is_some_and(|p| p.bare() == bare)
                        })
                        .cloned()
                        .expect("matched above");
                    let descriptor = summary.into_descriptor();
                    self.cache.put_descriptor(&pid, descriptor.clone()).await;
                    return Ok(descriptor);
                }
            }
        }

        Err(GatewayError::ProcessNotFound(bare.to_string()))
    }

    /// Provider listing, from cache when fresh.
    async fn provider_listing(&self, provider: &Arc<Provider>) -> GatewayResult<Vec<ProcessSummary>> {
        if let Some(cached) = self.cache.get_list(&provider.name).await {
            return Ok((*cached).clone());
        }
        let summaries = fetch_provider_list(provider, self.http.clone(), &self.pipeline).await?;
        self.cache.put_list(&provider.name, summaries.clone()).await;
        Ok(summaries)
    }

    async fn fetch_descriptor(
        &self,
        provider: &Provider,
        pid: &ProcessId,
    ) -> GatewayResult<ProcessDescriptor> {
        let url = provider.process_url(pid.bare());
        let response = self
            .http
            .get(&url, provider.timeout, &provider.auth_headers())
            .await?;

        if response.status == 404 {
            return Err(GatewayError::ProcessNotFound(pid.to_string()));
        }
        if !response.is_success() {
            return Err(GatewayError::BadGateway(format!(
                "{url} returned HTTP {}",
                response.status
            )));
        }
        let doc = response
            .json()
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| GatewayError::BadGateway(format!("{url} returned a non-JSON body")))?;

        let doc = self.pipeline.apply(provider, doc)?;
        let descriptor = ProcessDescriptor::new(doc);
        self.cache.put_descriptor(pid, descriptor.clone()).await;
        Ok(descriptor)
    }
}

/// Fetch and normalize one provider's process list.
async fn fetch_provider_list(
    provider: &Provider,
    http: Arc<dyn HttpClientPort>,
    pipeline: &ProcessPipeline,
) -> GatewayResult<Vec<ProcessSummary>> {
    let url = provider.processes_url();
    let response = http
        .get(&url, provider.timeout, &provider.auth_headers())
        .await?;

    if !response.is_success() {
        return Err(GatewayError::BadGateway(format!(
            "{url} returned HTTP {}",
            response.status
        )));
    }
    let processes = response
        .json()
        .and_then(|b| b.get("processes"))
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            GatewayError::BadGateway(format!("{url} returned no process list"))
        })?;

    let mut summaries = Vec::with_capacity(processes.len());
    for raw in processes {
        let Value::Object(doc) = raw else {
            tracing::debug!(provider = %provider.name, "skipping non-object process entry");
            continue;
        };

        match pipeline.apply(provider, doc) {
            Ok(doc) => {
                let summary = ProcessSummary { doc };
                let bare = summary
                    .id()
                    .and_then(|id| ProcessId::parse(id).ok())
                    .map(|pid| pid.bare().to_string());
                let excluded = bare
                    .as_deref()
                    .and_then(|b| provider.policy(b))
                    .is_some_and(|p| p.excluded);
                if excluded {
                    continue;
                }
                summaries.push(summary);
            }
            Err(err) => {
                tracing::warn!(provider = %provider.name, error = %err, "dropping malformed process document");
            }
        }
    }
    Ok(summaries)
}
