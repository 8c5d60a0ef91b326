//! SQLite pool bootstrap.
//!
//! The gateway keeps all durable state in one SQLite file (WAL mode), so
//! the bootstrap is deliberately small: make sure the file's directory
//! exists, open the pool, done. Tests get a single-connection in-memory
//! database instead.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The database URL or its filesystem location is unusable.
    #[error("cannot prepare database '{url}': {detail}")]
    Prepare { url: String, detail: String },
    /// SQLite refused the connection.
    #[error("cannot open database '{url}': {source}")]
    Open {
        url: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Open the gateway database, creating the file (and its directory) on
/// first run.
pub async fn connect(database_url: &str) -> Result<SqlitePool, ConnectionError> {
    if let Some(parent) = missing_parent_dir(database_url) {
        std::fs::create_dir_all(&parent).map_err(|e| ConnectionError::Prepare {
            url: database_url.to_string(),
            detail: format!("creating {}: {e}", parent.display()),
        })?;
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| ConnectionError::Prepare {
            url: database_url.to_string(),
            detail: e.to_string(),
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|source| ConnectionError::Open {
            url: database_url.to_string(),
            source,
        })
}

/// In-memory database for tests. A single connection keeps the shared
/// cache coherent across the whole test.
pub async fn connect_in_memory() -> Result<SqlitePool, ConnectionError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("static url")
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .shared_cache(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|source| ConnectionError::Open {
            url: "sqlite::memory:".to_string(),
            source,
        })
}

/// The directory that must exist before SQLite can create the database
/// file, if it is missing. In-memory URLs have none.
fn missing_parent_dir(database_url: &str) -> Option<std::path::PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    if path.is_empty() || path == ":memory:" {
        return None;
    }

    let parent = Path::new(path).parent()?;
    (!parent.as_os_str().is_empty() && !parent.exists()).then(|| parent.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_urls_need_no_directory() {
        assert!(missing_parent_dir("sqlite::memory:").is_none());
        assert!(missing_parent_dir("sqlite:").is_none());
    }

    #[test]
    fn bare_filenames_need_no_directory() {
        assert!(missing_parent_dir("sqlite:ump.db").is_none());
    }

    #[tokio::test]
    async fn in_memory_pool_opens() {
        let pool = connect_in_memory().await.expect("open in-memory pool");
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
    }
}
