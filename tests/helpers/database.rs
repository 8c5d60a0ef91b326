use sqlx::SqlitePool;

use ump_gateway::adapters::sqlite::{connect_in_memory, Migrator};

/// In-memory SQLite database with migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> SqlitePool {
    let pool = connect_in_memory()
        .await
        .expect("failed to create test database");
    Migrator::new(pool.clone())
        .run()
        .await
        .expect("failed to run migrations");
    pool
}
