//! Persisted per-table migration progress.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// One row of `migration_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMigrationState {
    pub table_name: String,
    pub current_version: u32,
    /// Unix seconds.
    pub last_migrated_at: i64,
}

/// Reads and writes `migration_state` in the relational store.
#[derive(Clone)]
pub struct MigrationStateStore {
    pool: SqlitePool,
}

impl MigrationStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the state table if it is missing.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migration_state (
                table_name TEXT PRIMARY KEY,
                current_version INTEGER NOT NULL,
                last_migrated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, table: &str) -> Result<Option<TableMigrationState>> {
        let row = sqlx::query(
            "SELECT table_name, current_version, last_migrated_at FROM migration_state WHERE table_name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TableMigrationState {
            table_name: row.get("table_name"),
            current_version: row.get::<i64, _>("current_version") as u32,
            last_migrated_at: row.get("last_migrated_at"),
        }))
    }

    /// Current version of `table`, `0` when it has never been migrated.
    pub async fn current_version(&self, table: &str) -> Result<u32> {
        Ok(self.get(table).await?.map(|s| s.current_version).unwrap_or(0))
    }

    pub async fn record(&self, table: &str, version: u32, at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_state (table_name, current_version, last_migrated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(table_name) DO UPDATE SET
                current_version = excluded.current_version,
                last_migrated_at = excluded.last_migrated_at
            "#,
        )
        .bind(table)
        .bind(version as i64)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TableMigrationState>> {
        let rows = sqlx::query(
            "SELECT table_name, current_version, last_migrated_at FROM migration_state ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TableMigrationState {
                table_name: row.get("table_name"),
                current_version: row.get::<i64, _>("current_version") as u32,
                last_migrated_at: row.get("last_migrated_at"),
            })
            .collect())
    }
}
