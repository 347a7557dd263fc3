//! Canonical schema description and backend type maps.
//!
//! Tables are described once, as static data, in terms of [`ColumnType`].
//! Each store picks a [`Backend`] at startup, and the backend's type map turns
//! the canonical description into SQL. Migration steps use the introspection
//! helpers here to check the physical schema before changing it.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

/// Logical column type, independent of the store that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    /// Unix seconds.
    Timestamp,
    /// JSON document stored as text.
    Json,
    /// Embedding vector, little-endian `f32`s.
    Vector,
}

/// Which store a schema is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Users, tags, push rules, migration state.
    Relational,
    /// Memos, attachments, categories, conversations, embedding cache.
    Vector,
}

impl Backend {
    /// SQL type name for a column type, or `None` if the backend cannot hold it.
    pub fn type_name(self, ty: ColumnType) -> Option<&'static str> {
        let map: &[(ColumnType, &str)] = match self {
            Backend::Relational => RELATIONAL_TYPES,
            Backend::Vector => VECTOR_TYPES,
        };
        map.iter().find(|(t, _)| *t == ty).map(|(_, name)| *name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Relational => "relational",
            Backend::Vector => "vector",
        }
    }
}

const RELATIONAL_TYPES: &[(ColumnType, &str)] = &[
    (ColumnType::Text, "TEXT"),
    (ColumnType::Integer, "INTEGER"),
    (ColumnType::Real, "REAL"),
    (ColumnType::Boolean, "INTEGER"),
    (ColumnType::Timestamp, "INTEGER"),
    (ColumnType::Json, "TEXT"),
];

const VECTOR_TYPES: &[(ColumnType, &str)] = &[
    (ColumnType::Text, "TEXT"),
    (ColumnType::Integer, "INTEGER"),
    (ColumnType::Real, "REAL"),
    (ColumnType::Boolean, "INTEGER"),
    (ColumnType::Timestamp, "INTEGER"),
    (ColumnType::Json, "TEXT"),
    (ColumnType::Vector, "BLOB"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Literal SQL default, e.g. `"0"` or `"'[]'"`.
    pub default: Option<&'static str>,
}

impl ColumnDef {
    /// A `NOT NULL` column with no default.
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            primary_key: false,
            default: None,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub const fn primary_key(self) -> Self {
        Self {
            primary_key: true,
            ..self
        }
    }

    pub const fn default(self, value: &'static str) -> Self {
        Self {
            default: Some(value),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

/// Render a column definition fragment (`name TYPE [PRIMARY KEY] [NOT NULL] [DEFAULT x]`).
pub fn column_sql(column: &ColumnDef, backend: Backend) -> Result<String> {
    let ty = backend.type_name(column.ty).ok_or_else(|| {
        anyhow::anyhow!(
            "column '{}' of type {:?} is not supported by the {} store",
            column.name,
            column.ty,
            backend.as_str()
        )
    })?;

    let mut sql = format!("{} {}", column.name, ty);
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if !column.nullable && !column.primary_key {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    Ok(sql)
}

pub fn create_table_sql(table: &TableDef, backend: Backend) -> Result<String> {
    let columns = table
        .columns
        .iter()
        .map(|c| column_sql(c, backend))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        table.name,
        columns.join(",\n    ")
    ))
}

pub fn add_column_sql(table: &str, column: &ColumnDef, backend: Backend) -> Result<String> {
    if column.primary_key {
        anyhow::bail!("cannot add primary key column '{}' to existing table", column.name);
    }
    if !column.nullable && column.default.is_none() {
        anyhow::bail!(
            "added column '{}' must be nullable or have a default",
            column.name
        );
    }
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        table,
        column_sql(column, backend)?
    ))
}

pub fn create_index_sql(index: &IndexDef) -> String {
    format!(
        "CREATE {}INDEX {} ON {}({})",
        if index.unique { "UNIQUE " } else { "" },
        index.name,
        index.table,
        index.columns.join(", ")
    )
}

// ============ Introspection ============

/// A column as reported by the physical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingColumn {
    pub name: String,
    pub declared_type: String,
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Columns of `table` in declaration order; empty if the table does not exist.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<ExistingColumn>> {
    let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| ExistingColumn {
            name: row.get("name"),
            declared_type: row.get("type"),
        })
        .collect())
}

pub async fn index_exists(pool: &SqlitePool, index: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'index' AND name = ?",
    )
    .bind(index)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
