//! Database initialization
//!
//! Creates the database on first run and applies the schema. Idempotent:
//! safe to call on every startup.
//!
//! Layout: one row per task/project/model in the metadata tables; one row
//! per unique `(task_id, metric, variant, iteration, value_kind)` key in
//! `task_events`, clustered by `task_id` through the primary key so
//! cascade deletes and per-task range scans stay cheap.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL mode: concurrent readers with one writer, needed for the
    // ingestion/aggregation mix on a shared pool
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests. Pinned to a single connection so every
/// caller sees the same memory database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_tables(&pool).await?;

    Ok(pool)
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS projects (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT PRIMARY KEY,
            project_id      TEXT,
            name            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'created',
            status_reason   TEXT,
            created_at      INTEGER NOT NULL,
            last_update     INTEGER NOT NULL,
            last_iteration  INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)")
        .execute(pool)
        .await?;

    // Watchdog sweep scans by (status, last_update)
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status_update ON tasks(status, last_update)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS models (
            id            TEXT PRIMARY KEY,
            task_id       TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            name          TEXT NOT NULL,
            artifact_uri  TEXT NOT NULL,
            created_at    INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_models_task ON models(task_id)")
        .execute(pool)
        .await?;

    // Append-only event store. The primary key is the event uniqueness
    // key; an insert on an existing key is an upsert (last-write-wins by
    // arrival_seq). timestamp/scalar_value/text_value hold the payload,
    // with the occupied column decided by value_kind. The foreign key
    // closes the ingestion/delete race: a writer holding a stale task
    // snapshot cannot insert rows once the task is gone.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS task_events (
            task_id       TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            metric        TEXT NOT NULL,
            variant       TEXT NOT NULL,
            iteration     INTEGER NOT NULL,
            value_kind    TEXT NOT NULL,
            timestamp     INTEGER NOT NULL,
            scalar_value  REAL,
            text_value    TEXT,
            arrival_seq   INTEGER NOT NULL,
            PRIMARY KEY (task_id, metric, variant, iteration, value_kind)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_schema() {
        let pool = init_memory_database().await.expect("init");
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query");
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["projects", "tasks", "models", "task_events"] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let pool = init_memory_database().await.expect("init");
        create_tables(&pool).await.expect("second run");
    }
}
