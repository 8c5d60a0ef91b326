//! Ports (hexagonal interfaces) of the gateway core.

pub mod http_client;
pub mod job_repository;
pub mod observers;

pub use http_client::{HttpBody, HttpClientPort, HttpResponse, BODY_EXCERPT_LIMIT};
pub use job_repository::{JobFilter, JobRepository, StatusHistoryEntry};
pub use observers::JobObserver;
