//! Database schema migrations.
//!
//! Creates the failure-learning table and ensures idempotent execution.
//! Designed to be run via `pscout init`.
//!
//! # Schema
//!
//! ```text
//! ┌───────────────────┐
//! │  search_failures  │
//! │                   │
//! │ id (PK)           │
//! │ original_query    │
//! │ normalized_query  │
//! │ candidates (JSON) │
//! │ attempted_count   │
//! │ error_message     │
//! │ category          │
//! │ brand             │
//! │ model             │
//! │ status            │
//! │ correct_name      │
//! │ correct_product_id│
//! │ created_at        │
//! │ updated_at        │
//! └───────────────────┘
//! ```
//!
//! # Indexes
//!
//! - `idx_failures_original_query` — repeated-pattern grouping
//! - `idx_failures_created_at` — recency windows for analytics
//! - `idx_failures_status` — pending/resolved filtering
//!
//! # Idempotency
//!
//! All statements use `CREATE ... IF NOT EXISTS`; running `pscout init`
//! multiple times is safe.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Run all database migrations against the configured database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Run migrations on an existing pool (used by tests with `sqlite::memory:`).
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_query TEXT NOT NULL,
            normalized_query TEXT NOT NULL,
            candidates TEXT NOT NULL DEFAULT '[]',
            attempted_count INTEGER NOT NULL DEFAULT 1,
            error_message TEXT,
            category TEXT,
            brand TEXT,
            model TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            correct_name TEXT,
            correct_product_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_failures_original_query ON search_failures(original_query)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_failures_created_at ON search_failures(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_failures_status ON search_failures(status)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        run_migrations_on(&pool).await.unwrap();

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='search_failures'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists);
    }
}
