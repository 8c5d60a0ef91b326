//! Embedded schema migrations.
//!
//! The schema ships inside the binary; `Migrator::run` replays whatever
//! the `schema_migrations` ledger says has not been applied yet.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration ledger unavailable: {0}")]
    Ledger(#[source] sqlx::Error),
    #[error("migration {version} ({description}) failed: {source}")]
    Apply {
        version: i64,
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations in order. New schema changes append here.
pub fn embedded_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "jobs and status history",
        sql: r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                process_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                remote_job_id TEXT,
                remote_status_url TEXT,
                status TEXT NOT NULL,
                status_info TEXT NOT NULL,
                inputs TEXT,
                results TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_provider ON jobs(provider);

            CREATE TABLE IF NOT EXISTS job_status_history (
                job_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                observed_at TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                PRIMARY KEY (job_id, seq)
            );
        "#,
    }]
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply all pending embedded migrations. Returns how many ran.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        // The ledger itself is not a migration; bootstrap it in place so
        // version queries below always have a table to hit.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(MigrationError::Ledger)?;

        let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::Ledger)?;
        let applied = applied.unwrap_or(0);

        let mut ran = 0;
        for migration in embedded_migrations() {
            if migration.version <= applied {
                continue;
            }
            self.apply(&migration).await?;
            ran += 1;
        }
        Ok(ran)
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        let fail = |source| MigrationError::Apply {
            version: migration.version,
            description: migration.description,
            source,
        };

        // SQLite executes one statement per call; split on the semicolons
        // between statements.
        for statement in migration.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await.map_err(fail)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&self.pool)
            .await
            .map_err(fail)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::connect_in_memory;

    #[tokio::test]
    async fn run_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        let migrator = Migrator::new(pool);
        assert_eq!(migrator.run().await.unwrap(), 1);
        assert_eq!(migrator.run().await.unwrap(), 0);
    }
}
