use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use ump_gateway::adapters::cache::ProcessCache;
use ump_gateway::adapters::http::ReqwestHttpClient;
use ump_gateway::adapters::sqlite::SqliteJobRepository;
use ump_gateway::domain::models::{ProcessPolicy, Provider};
use ump_gateway::domain::ports::{HttpClientPort, JobRepository};
use ump_gateway::services::{
    JobManager, JobManagerConfig, PollingSchedulerObserver, ProcessManager, ProcessPipeline,
    ProviderRegistry, StatusHistoryObserver,
};

use super::database::setup_test_db;

/// Fully wired engine against one mock upstream provider named `ms1`.
#[allow(dead_code)]
pub struct TestGateway {
    pub manager: Arc<JobManager>,
    pub repo: Arc<dyn JobRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub processes: Arc<ProcessManager>,
}

#[allow(dead_code)]
pub fn provider(name: &str, base_url: &str, process_ids: &[&str]) -> Provider {
    let mut processes = BTreeMap::new();
    for id in process_ids {
        processes.insert(id.to_string(), ProcessPolicy::default());
    }
    Provider {
        name: name.to_string(),
        base_url: Url::parse(base_url).expect("bad test provider url"),
        auth: None,
        timeout: Duration::from_secs(2),
        processes,
    }
}

#[allow(dead_code)]
pub async fn gateway(upstream_url: &str, config: JobManagerConfig) -> TestGateway {
    gateway_with_providers(vec![provider("ms1", upstream_url, &["square"])], config).await
}

#[allow(dead_code)]
pub async fn gateway_with_providers(
    providers: Vec<Provider>,
    config: JobManagerConfig,
) -> TestGateway {
    let registry = Arc::new(
        ProviderRegistry::new(providers, Duration::from_secs(2)).expect("bad test providers"),
    );
    let pool = setup_test_db().await;
    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool));
    let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttpClient::new());
    let cache = Arc::new(ProcessCache::new(Duration::from_secs(60)));
    let pipeline = ProcessPipeline::new(true, "http://localhost:5000");

    let processes = Arc::new(ProcessManager::new(
        registry.clone(),
        http.clone(),
        cache,
        pipeline,
    ));
    let manager = JobManager::new(
        registry.clone(),
        http,
        repo.clone(),
        processes.clone(),
        config,
    );
    manager.register_observer(Arc::new(StatusHistoryObserver::new(repo.clone())));
    manager.register_observer(Arc::new(PollingSchedulerObserver::new(manager.poller())));

    TestGateway {
        manager,
        repo,
        registry,
        processes,
    }
}
