mod models;
mod seeders;

pub use models::*;
pub use seeders::{create_admin, ensure_default_admin, ensure_roles};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path, config: &DatabaseConfig) -> Result<DbPool> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("cellar.db");

    info!("Initializing database at {}", db_path.display());

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users, roles, catalog, cart and invoices
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Audit trail
    let has_audit_logs_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='audit_logs'",
    )
    .fetch_optional(pool)
    .await?;
    if has_audit_logs_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/002_audit_logs.sql")).await?;
    }

    seeders::ensure_roles(pool).await?;

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::default();

        let pool = init(dir.path(), &config).await.unwrap();
        pool.close().await;
        let pool = init(dir.path(), &config).await.unwrap();

        let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(roles, 3);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_on_every_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init(dir.path(), &DatabaseConfig::default()).await.unwrap();

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
            assert_eq!(enabled, 1);
        }
    }
}
