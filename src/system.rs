//! System information and per-user statistics.
//!
//! `info` describes the running server: version, uptime, locale, storage
//! backend, AI status, and the boot migration outcome. `stats` gives the
//! caller a summary of their data: memo counts, embedding coverage, tags,
//! and a per-category breakdown.

use serde::Serialize;
use sqlx::Row;

use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::migrate::TableReport;
use crate::models::now_ts;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub uptime: String,
    pub language: String,
    pub timezone: String,
    pub storage_backend: &'static str,
    pub ai_enabled: bool,
    pub embedding_model: Option<String>,
    pub registration_open: bool,
    pub backup_enabled: bool,
    pub database_size: String,
    pub migrations_complete: bool,
    pub migrations: Vec<TableReport>,
}

#[derive(Debug, Serialize)]
pub struct CategoryCount {
    pub category_id: Option<String>,
    pub name: Option<String>,
    pub memo_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub memo_count: i64,
    pub pinned_count: i64,
    pub public_count: i64,
    pub embedded_count: i64,
    /// Percentage of memos with an embedding.
    pub embedded_percent: i64,
    pub tag_count: i64,
    pub attachment_count: i64,
    pub attachment_bytes: String,
    pub conversation_count: i64,
    pub by_category: Vec<CategoryCount>,
}

pub fn info(ctx: &AppContext) -> SystemInfo {
    let uptime_secs = (now_ts() - ctx.started_at).max(0);
    let db_bytes: u64 = [&ctx.config.db.relational_path, &ctx.config.db.vector_path]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    SystemInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs,
        uptime: format_duration(uptime_secs),
        language: ctx.config.locale.language.clone(),
        timezone: ctx.config.locale.timezone.clone(),
        storage_backend: ctx.storage.backend(),
        ai_enabled: ctx.ai.is_enabled(),
        embedding_model: ctx
            .ai
            .is_enabled()
            .then(|| ctx.ai.embedding_model().to_string()),
        registration_open: ctx.config.auth.allow_registration,
        backup_enabled: ctx.config.backup.enabled,
        database_size: format_bytes(db_bytes),
        migrations_complete: ctx.migrations.is_complete(),
        migrations: ctx.migrations.tables.clone(),
    }
}

pub async fn stats(ctx: &AppContext, user: &AuthUser) -> AppResult<UserStats> {
    let vectors = &ctx.stores.vectors;

    let memo_row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS memo_count,
            COALESCE(SUM(is_pinned), 0) AS pinned_count,
            COALESCE(SUM(is_public), 0) AS public_count,
            COALESCE(SUM(embedding IS NOT NULL), 0) AS embedded_count
        FROM memos WHERE user_id = ?
        "#,
    )
    .bind(&user.id)
    .fetch_one(vectors)
    .await?;
    let memo_count: i64 = memo_row.get("memo_count");
    let embedded_count: i64 = memo_row.get("embedded_count");

    let tag_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE user_id = ? AND usage_count > 0")
            .bind(&user.id)
            .fetch_one(&ctx.stores.relational)
            .await?;

    let attachment_row = sqlx::query(
        "SELECT COUNT(*) AS n, COALESCE(SUM(size), 0) AS bytes FROM attachments WHERE user_id = ?",
    )
    .bind(&user.id)
    .fetch_one(vectors)
    .await?;
    let attachment_bytes: i64 = attachment_row.get("bytes");

    let conversation_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ai_conversations WHERE user_id = ?")
            .bind(&user.id)
            .fetch_one(vectors)
            .await?;

    let category_rows = sqlx::query(
        r#"
        SELECT m.category_id AS category_id, c.name AS name, COUNT(*) AS memo_count
        FROM memos m
        LEFT JOIN categories c ON c.id = m.category_id
        WHERE m.user_id = ?
        GROUP BY m.category_id
        ORDER BY memo_count DESC
        "#,
    )
    .bind(&user.id)
    .fetch_all(vectors)
    .await?;

    Ok(UserStats {
        memo_count,
        pinned_count: memo_row.get("pinned_count"),
        public_count: memo_row.get("public_count"),
        embedded_count,
        embedded_percent: if memo_count > 0 {
            (embedded_count * 100) / memo_count
        } else {
            0
        },
        tag_count,
        attachment_count: attachment_row.get("n"),
        attachment_bytes: format_bytes(attachment_bytes.max(0) as u64),
        conversation_count,
        by_category: category_rows
            .iter()
            .map(|row| CategoryCount {
                category_id: row.get("category_id"),
                name: row.get("name"),
                memo_count: row.get("memo_count"),
            })
            .collect(),
    })
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// `"3d 4h"`, `"2h 5m"`, `"45s"`.
fn format_duration(secs: i64) -> String {
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7_500), "2h 5m");
        assert_eq!(format_duration(3 * 86_400 + 4 * 3600), "3d 4h");
    }
}
