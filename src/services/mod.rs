//! Service layer: configuration, discovery and the job lifecycle engine.

pub mod config;
pub mod derivation;
pub mod job_manager;
pub mod observers;
pub mod pipeline;
pub mod process_manager;
pub mod registry;
pub mod retry;

pub use config::{ConfigError, GatewayConfig};
pub use job_manager::{ExecutionOutcome, JobManager, JobManagerConfig, PollCoordinator};
pub use observers::{
    ObserverBus, PollingSchedulerObserver, ResultsVerificationObserver, StatusHistoryObserver,
};
pub use pipeline::ProcessPipeline;
pub use process_manager::ProcessManager;
pub use registry::ProviderRegistry;
pub use retry::{RetryConfig, RetryPolicy};
