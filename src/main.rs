//! Composition root: wires adapters into the engine and serves the API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use ump_gateway::adapters::cache::ProcessCache;
use ump_gateway::adapters::http::ReqwestHttpClient;
use ump_gateway::adapters::sqlite::{connect, Migrator, SqliteJobRepository};
use ump_gateway::api::{self, AppState};
use ump_gateway::domain::ports::{HttpClientPort, JobRepository};
use ump_gateway::services::{
    GatewayConfig, JobManager, JobManagerConfig, PollingSchedulerObserver, ProcessManager,
    ProcessPipeline, ProviderRegistry, ResultsVerificationObserver, StatusHistoryObserver,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!(bind = %config.bind_addr, "starting gateway");

    let registry = Arc::new(
        ProviderRegistry::from_file(&config.providers_file, config.default_provider_timeout())
            .context("failed to load providers file")?,
    );
    tracing::info!(providers = registry.list().len(), "providers loaded");

    let pool = connect(&config.database_url)
        .await
        .context("failed to open database")?;
    let applied = Migrator::new(pool.clone())
        .run()
        .await
        .context("failed to run migrations")?;
    if applied > 0 {
        tracing::info!(applied, "database migrations applied");
    }

    let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttpClient::new());
    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool));
    let cache = Arc::new(ProcessCache::new(config.process_cache_ttl()));
    let pipeline = ProcessPipeline::new(config.rewrite_remote_links, &config.api_server_url);

    let processes = Arc::new(ProcessManager::new(
        registry.clone(),
        http.clone(),
        cache,
        pipeline,
    ));
    let job_manager = JobManager::new(
        registry.clone(),
        http.clone(),
        repo.clone(),
        processes.clone(),
        JobManagerConfig::from(&config),
    );

    job_manager.register_observer(Arc::new(StatusHistoryObserver::new(repo)));
    job_manager.register_observer(Arc::new(PollingSchedulerObserver::new(job_manager.poller())));
    if config.verify_remote_results {
        job_manager.register_observer(Arc::new(ResultsVerificationObserver::new(
            http, registry,
        )));
    }

    let state = AppState {
        job_manager: job_manager.clone(),
        processes,
        config: Arc::new(config.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let shutdown_manager = job_manager.clone();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    shutdown_manager.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(())
}
