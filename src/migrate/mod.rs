//! Versioned schema migrations for both stores.
//!
//! Each table has its own linear history of [`MigrationStep`]s. A step checks
//! the physical schema before changing it, so re-running is always safe. The
//! [`MigrationRunner`] applies pending steps in ascending version order and
//! records progress per table in `migration_state` (relational store).
//!
//! ```text
//! registry ──▶ steps_after_version(table, current) ──▶ apply ──▶ record
//!                                                        │
//!                                  Failed ──▶ stop this table, continue others
//! ```

mod registry;
mod runner;
mod state;
mod step;
pub mod steps;

use anyhow::Result;
use sqlx::SqlitePool;

pub use registry::MigrationRegistry;
pub use runner::{MigrationReport, MigrationRunner, TableReport};
pub use state::{MigrationStateStore, TableMigrationState};
pub use step::{MigrationStep, Probe, SchemaChange, StepOutcome};

use crate::schema::Backend;

/// Bring both stores up to date with the built-in step lists.
///
/// Table failures are reported, not returned: boot continues with whatever
/// tables did migrate.
pub async fn run_migrations(relational: &SqlitePool, vectors: &SqlitePool) -> Result<MigrationReport> {
    let runner = MigrationRunner::new(MigrationStateStore::new(relational.clone()));

    let mut report = runner
        .run(&steps::relational()?, relational, Backend::Relational)
        .await?;
    report.extend(runner.run(&steps::vector()?, vectors, Backend::Vector).await?);

    let failed = report.failed_tables().len();
    if failed == 0 {
        tracing::info!(tables = report.tables.len(), "schema up to date");
    } else {
        tracing::warn!(failed, "some tables are not fully migrated");
    }
    Ok(report)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}
