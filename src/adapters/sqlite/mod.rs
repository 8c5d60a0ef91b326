//! SQLite persistence adapters.

pub mod connection;
pub mod job_repository;
pub mod migrations;

pub use connection::{connect, connect_in_memory, ConnectionError};
pub use job_repository::SqliteJobRepository;
pub use migrations::{Migration, MigrationError, Migrator};
