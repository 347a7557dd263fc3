//! A single versioned, idempotent schema change.

use sqlx::SqlitePool;

use crate::schema::{self, Backend, ColumnDef, IndexDef, TableDef};

/// What a step does to the physical schema.
#[derive(Debug, Clone, Copy)]
pub enum SchemaChange {
    CreateTable(&'static TableDef),
    AddColumn(ColumnDef),
    CreateIndex(IndexDef),
    /// Arbitrary SQL, skipped when `skip_if` already holds.
    ///
    /// With [`Probe::Never`] the SQL itself must be safe to re-run.
    Execute {
        sql: &'static str,
        skip_if: Probe,
    },
}

/// A schema condition that can be checked before running SQL.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    TableExists(&'static str),
    ColumnExists(&'static str, &'static str),
    IndexExists(&'static str),
    Never,
}

impl Probe {
    async fn holds(&self, pool: &SqlitePool) -> anyhow::Result<bool> {
        match *self {
            Probe::TableExists(table) => schema::table_exists(pool, table).await,
            Probe::ColumnExists(table, column) => Ok(schema::table_columns(pool, table)
                .await?
                .iter()
                .any(|c| c.name == column)),
            Probe::IndexExists(index) => schema::index_exists(pool, index).await,
            Probe::Never => Ok(false),
        }
    }
}

/// Result of applying one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The change was made.
    Applied,
    /// The schema already reflected the change; nothing was touched.
    AlreadyApplied,
    /// The change could not be made. Fatal for the rest of this table's steps.
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub version: u32,
    pub table: &'static str,
    pub description: &'static str,
    pub change: SchemaChange,
}

impl MigrationStep {
    pub const fn new(
        version: u32,
        table: &'static str,
        description: &'static str,
        change: SchemaChange,
    ) -> Self {
        Self {
            version,
            table,
            description,
            change,
        }
    }

    /// Apply this step against `pool`, checking the physical schema first.
    ///
    /// Depends only on what the store reports, never on other steps' state.
    pub async fn apply(&self, pool: &SqlitePool, backend: Backend) -> StepOutcome {
        match self.try_apply(pool, backend).await {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::Failed(format!("{:#}", e)),
        }
    }

    async fn try_apply(&self, pool: &SqlitePool, backend: Backend) -> anyhow::Result<StepOutcome> {
        match self.change {
            SchemaChange::CreateTable(table) => {
                if schema::table_exists(pool, table.name).await? {
                    return Ok(StepOutcome::AlreadyApplied);
                }
                let sql = schema::create_table_sql(table, backend)?;
                sqlx::query(&sql).execute(pool).await?;
                Ok(StepOutcome::Applied)
            }
            SchemaChange::AddColumn(column) => {
                let existing = schema::table_columns(pool, self.table).await?;
                if existing.is_empty() {
                    anyhow::bail!("table '{}' does not exist", self.table);
                }
                if let Some(found) = existing.iter().find(|c| c.name == column.name) {
                    let expected = backend.type_name(column.ty).unwrap_or("?");
                    if found.declared_type.eq_ignore_ascii_case(expected) {
                        return Ok(StepOutcome::AlreadyApplied);
                    }
                    return Ok(StepOutcome::Failed(format!(
                        "column '{}.{}' exists as {} but {} is expected",
                        self.table, column.name, found.declared_type, expected
                    )));
                }
                let sql = schema::add_column_sql(self.table, &column, backend)?;
                sqlx::query(&sql).execute(pool).await?;
                Ok(StepOutcome::Applied)
            }
            SchemaChange::CreateIndex(index) => {
                if schema::index_exists(pool, index.name).await? {
                    return Ok(StepOutcome::AlreadyApplied);
                }
                sqlx::query(&schema::create_index_sql(&index))
                    .execute(pool)
                    .await?;
                Ok(StepOutcome::Applied)
            }
            SchemaChange::Execute { sql, skip_if } => {
                if skip_if.holds(pool).await? {
                    return Ok(StepOutcome::AlreadyApplied);
                }
                sqlx::raw_sql(sql).execute(pool).await?;
                Ok(StepOutcome::Applied)
            }
        }
    }
}
