//! Infrastructure adapters implementing the domain ports.

pub mod cache;
pub mod http;
pub mod sqlite;

pub use cache::ProcessCache;
pub use http::ReqwestHttpClient;
pub use sqlite::SqliteJobRepository;
