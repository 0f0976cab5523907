//! SQLite pool for the failure-learning store.
//!
//! The store sees one traffic shape: the background failure recorder
//! appends rows one at a time, while the analytics endpoints and the CLI
//! run read-mostly aggregate queries over them. WAL lets those readers
//! proceed under an in-flight append, and the busy timeout absorbs the
//! writer/reader handoff during failure bursts. The pool stays small —
//! the single writer task plus a couple of concurrent analytics reads is
//! the realistic ceiling.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.database.path;

    // First run on a fresh host: the data directory may not exist yet.
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    Ok(pool)
}
