//! SQLite connection management for the two stores.
//!
//! The relational store (users, tags, push rules, migration state) and the
//! vector store (memos, embeddings, attachments, conversations) are separate
//! SQLite files, each behind its own pool. Both use WAL so request handlers,
//! the backup task, and the optimiser can overlap without blocking readers.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Both pools, created once at boot and shared by handle.
#[derive(Clone)]
pub struct Stores {
    pub relational: SqlitePool,
    pub vectors: SqlitePool,
}

impl Stores {
    pub async fn connect(config: &Config) -> Result<Self> {
        let relational = connect(&config.db.relational_path, config.db.max_connections).await?;
        let vectors = connect(&config.db.vector_path, config.db.max_connections).await?;
        Ok(Self {
            relational,
            vectors,
        })
    }

    pub async fn close(&self) {
        self.relational.close().await;
        self.vectors.close().await;
    }
}

/// Open a pool on `db_path`, creating the file and its parent directories.
pub async fn connect(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// `true` when `err` is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
