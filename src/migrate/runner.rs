//! Applies pending steps table by table and records progress.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::registry::MigrationRegistry;
use super::state::MigrationStateStore;
use super::step::StepOutcome;
use crate::schema::Backend;

/// What happened to one table during a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub store: &'static str,
    pub from_version: u32,
    pub to_version: u32,
    pub latest_version: u32,
    pub applied: Vec<u32>,
    pub already_applied: Vec<u32>,
    pub error: Option<String>,
}

impl TableReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.to_version == self.latest_version
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn failed_tables(&self) -> Vec<&TableReport> {
        self.tables.iter().filter(|t| t.error.is_some()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.tables.iter().all(TableReport::is_complete)
    }

    pub fn extend(&mut self, other: MigrationReport) {
        self.tables.extend(other.tables);
    }
}

/// Walks a registry against one store, persisting versions in the state store.
pub struct MigrationRunner {
    state: MigrationStateStore,
}

impl MigrationRunner {
    pub fn new(state: MigrationStateStore) -> Self {
        Self { state }
    }

    /// Migrate every table in `registry` on `pool`.
    ///
    /// Tables are independent: a failed step stops only its own table.
    /// Returns `Err` only when the state table itself cannot be prepared.
    pub async fn run(
        &self,
        registry: &MigrationRegistry,
        pool: &SqlitePool,
        backend: Backend,
    ) -> Result<MigrationReport> {
        self.state.ensure_table().await?;

        let mut report = MigrationReport::default();
        for table in registry.tables_in_order() {
            let table_report = self.migrate_table(registry, pool, backend, table).await;
            if let Some(ref err) = table_report.error {
                tracing::error!(
                    table,
                    store = backend.as_str(),
                    version = table_report.to_version,
                    error = %err,
                    "table not fully migrated"
                );
            }
            report.tables.push(table_report);
        }
        Ok(report)
    }

    async fn migrate_table(
        &self,
        registry: &MigrationRegistry,
        pool: &SqlitePool,
        backend: Backend,
        table: &str,
    ) -> TableReport {
        let latest_version = registry.latest_version(table);
        let mut report = TableReport {
            table: table.to_string(),
            store: backend.as_str(),
            from_version: 0,
            to_version: 0,
            latest_version,
            applied: Vec::new(),
            already_applied: Vec::new(),
            error: None,
        };

        let current = match self.state.current_version(table).await {
            Ok(v) => v,
            Err(e) => {
                report.error = Some(format!("reading migration state: {:#}", e));
                return report;
            }
        };
        report.from_version = current;
        report.to_version = current;

        for step in registry.steps_after_version(table, current) {
            match step.apply(pool, backend).await {
                StepOutcome::Applied => {
                    tracing::info!(table, version = step.version, description = step.description, "migration applied");
                    report.applied.push(step.version);
                }
                StepOutcome::AlreadyApplied => {
                    tracing::debug!(table, version = step.version, "migration already applied");
                    report.already_applied.push(step.version);
                }
                StepOutcome::Failed(reason) => {
                    report.error = Some(format!("v{} ({}): {}", step.version, step.description, reason));
                    return report;
                }
            }

            let now = chrono::Utc::now().timestamp();
            if let Err(e) = self.state.record(table, step.version, now).await {
                report.error = Some(format!("recording v{}: {:#}", step.version, e));
                return report;
            }
            report.to_version = step.version;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::step::{MigrationStep, Probe, SchemaChange};
    use crate::migrate::test_pool;
    use crate::schema::{ColumnDef, ColumnType, TableDef};
    use sqlx::Row;

    const JOURNAL: TableDef = TableDef {
        name: "journal",
        columns: &[ColumnDef::new("id", ColumnType::Text).primary_key()],
    };

    const LEDGER: TableDef = TableDef {
        name: "ledger",
        columns: &[ColumnDef::new("id", ColumnType::Integer).primary_key()],
    };

    fn failing_registry() -> MigrationRegistry {
        MigrationRegistry::new(vec![
            MigrationStep::new(1, "journal", "create", SchemaChange::CreateTable(&JOURNAL)),
            MigrationStep::new(
                2,
                "journal",
                "broken",
                SchemaChange::Execute {
                    sql: "ALTER TABLE journal RENAME TO",
                    skip_if: Probe::Never,
                },
            ),
            MigrationStep::new(
                3,
                "journal",
                "add body",
                SchemaChange::AddColumn(ColumnDef::new("body", ColumnType::Text).nullable()),
            ),
            MigrationStep::new(1, "ledger", "create", SchemaChange::CreateTable(&LEDGER)),
            MigrationStep::new(
                2,
                "ledger",
                "add amount",
                SchemaChange::AddColumn(ColumnDef::new("amount", ColumnType::Real).default("0")),
            ),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_failure_stops_only_its_table() {
        let pool = test_pool().await;
        let state = MigrationStateStore::new(pool.clone());
        let runner = MigrationRunner::new(state.clone());

        let report = runner
            .run(&failing_registry(), &pool, Backend::Vector)
            .await
            .unwrap();

        let journal = report.table("journal").unwrap();
        assert_eq!(journal.to_version, 1);
        assert!(journal.error.as_deref().unwrap().starts_with("v2"));
        assert!(!journal.is_complete());
        assert_eq!(state.current_version("journal").await.unwrap(), 1);

        let columns = crate::schema::table_columns(&pool, "journal").await.unwrap();
        assert!(columns.iter().all(|c| c.name != "body"), "v3 must not run");

        let ledger = report.table("ledger").unwrap();
        assert!(ledger.is_complete());
        assert_eq!(state.current_version("ledger").await.unwrap(), 2);
        assert_eq!(report.failed_tables().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let pool = test_pool().await;
        let state = MigrationStateStore::new(pool.clone());
        let runner = MigrationRunner::new(state.clone());
        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(1, "ledger", "create", SchemaChange::CreateTable(&LEDGER)),
            MigrationStep::new(
                2,
                "ledger",
                "add amount",
                SchemaChange::AddColumn(ColumnDef::new("amount", ColumnType::Real).default("0")),
            ),
        ])
        .unwrap();

        let first = runner.run(&registry, &pool, Backend::Vector).await.unwrap();
        assert!(first.is_complete());
        assert_eq!(first.table("ledger").unwrap().applied, vec![1, 2]);
        let before = state.list().await.unwrap();

        let second = runner.run(&registry, &pool, Backend::Vector).await.unwrap();
        let ledger = second.table("ledger").unwrap();
        assert!(ledger.applied.is_empty());
        assert!(ledger.already_applied.is_empty());
        assert_eq!(ledger.from_version, 2);
        assert!(ledger.error.is_none());
        assert_eq!(state.list().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_lower_versions_apply_first() {
        let pool = test_pool().await;
        let runner = MigrationRunner::new(MigrationStateStore::new(pool.clone()));
        // Declared out of order on purpose.
        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(
                3,
                "events",
                "third",
                SchemaChange::Execute {
                    sql: "INSERT INTO events (step) VALUES (3)",
                    skip_if: Probe::Never,
                },
            ),
            MigrationStep::new(
                1,
                "events",
                "create",
                SchemaChange::Execute {
                    sql: "CREATE TABLE events (seq INTEGER PRIMARY KEY AUTOINCREMENT, step INTEGER NOT NULL)",
                    skip_if: Probe::TableExists("events"),
                },
            ),
            MigrationStep::new(
                2,
                "events",
                "second",
                SchemaChange::Execute {
                    sql: "INSERT INTO events (step) VALUES (2)",
                    skip_if: Probe::Never,
                },
            ),
        ])
        .unwrap();

        runner.run(&registry, &pool, Backend::Relational).await.unwrap();

        let rows = sqlx::query("SELECT step FROM events ORDER BY seq")
            .fetch_all(&pool)
            .await
            .unwrap();
        let steps: Vec<i64> = rows.iter().map(|r| r.get("step")).collect();
        assert_eq!(steps, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_resumes_from_recorded_version() {
        let pool = test_pool().await;
        let state = MigrationStateStore::new(pool.clone());
        state.ensure_table().await.unwrap();
        sqlx::query("CREATE TABLE ledger (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        state.record("ledger", 1, 100).await.unwrap();

        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(1, "ledger", "create", SchemaChange::CreateTable(&LEDGER)),
            MigrationStep::new(
                2,
                "ledger",
                "add amount",
                SchemaChange::AddColumn(ColumnDef::new("amount", ColumnType::Real).default("0")),
            ),
        ])
        .unwrap();
        let report = MigrationRunner::new(state.clone())
            .run(&registry, &pool, Backend::Vector)
            .await
            .unwrap();

        let ledger = report.table("ledger").unwrap();
        assert_eq!(ledger.from_version, 1);
        assert_eq!(ledger.applied, vec![2]);
        let saved = state.get("ledger").await.unwrap().unwrap();
        assert_eq!(saved.current_version, 2);
        assert!(saved.last_migrated_at > 100);
    }
}
