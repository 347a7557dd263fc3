//! Tag listing, rename, and delete.
//!
//! Tag rows (relational store) carry usage counts; the memo rows (vector
//! store) carry the tag names themselves. Rename and delete rewrite both.

use serde::Deserialize;
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::models::{now_ts, Tag};
use crate::response::ErrorCode;

#[derive(Debug, Deserialize)]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    /// `""` clears the color.
    pub color: Option<String>,
}

fn tag_from_row(row: &sqlx::sqlite::SqliteRow) -> Tag {
    Tag {
        id: row.get("id"),
        name: row.get("name"),
        usage_count: row.get("usage_count"),
        color: row.get("color"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const TAG_COLUMNS: &str = "id, name, usage_count, color, created_at, updated_at";

/// Tags still in use, most used first.
pub async fn list_tags(pool: &SqlitePool, user: &AuthUser) -> AppResult<Vec<Tag>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM tags WHERE user_id = ? AND usage_count > 0 ORDER BY usage_count DESC, name",
        TAG_COLUMNS
    ))
    .bind(&user.id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(tag_from_row).collect())
}

async fn get_tag(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Tag> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM tags WHERE id = ? AND user_id = ?",
        TAG_COLUMNS
    ))
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::TAG_NOT_FOUND))?;
    Ok(tag_from_row(&row))
}

/// Replace `from` in every memo tag list of the user; `to: None` removes it.
async fn rewrite_memo_tags(
    vectors: &SqlitePool,
    user_id: &str,
    from: &str,
    to: Option<&str>,
) -> AppResult<u64> {
    let rows = sqlx::query(
        r#"
        SELECT id, tags FROM memos
        WHERE user_id = ? AND EXISTS (SELECT 1 FROM json_each(memos.tags) WHERE json_each.value = ?)
        "#,
    )
    .bind(user_id)
    .bind(from)
    .fetch_all(vectors)
    .await?;

    let mut tx = vectors.begin().await?;
    for row in &rows {
        let id: String = row.get("id");
        let tags: String = row.get("tags");
        let tags: Vec<String> = serde_json::from_str(&tags).unwrap_or_default();
        let rewritten = replace_tag(&tags, from, to);
        sqlx::query("UPDATE memos SET tags = ? WHERE id = ?")
            .bind(serde_json::to_string(&rewritten).map_err(anyhow::Error::from)?)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(rows.len() as u64)
}

fn replace_tag(tags: &[String], from: &str, to: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let next = if tag == from {
            match to {
                Some(to) => to.to_string(),
                None => continue,
            }
        } else {
            tag.clone()
        };
        if !out.contains(&next) {
            out.push(next);
        }
    }
    out
}

pub async fn update_tag(
    ctx: &AppContext,
    user: &AuthUser,
    id: &str,
    req: UpdateTagRequest,
) -> AppResult<Tag> {
    let pool = &ctx.stores.relational;
    let current = get_tag(pool, user, id).await?;

    let name = match req.name {
        Some(n) => {
            let n = n.trim().trim_start_matches('#').trim().to_string();
            if n.is_empty() {
                return Err(AppError::Validation("name must not be empty".into()));
            }
            n
        }
        None => current.name.clone(),
    };
    let color = match req.color {
        Some(c) if c.is_empty() => None,
        Some(c) => Some(c),
        None => current.color.clone(),
    };

    let mut tx = pool.begin().await?;
    let updated = sqlx::query("UPDATE tags SET name = ?, color = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&color)
        .bind(now_ts())
        .bind(id)
        .execute(&mut *tx)
        .await;
    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::business(ErrorCode::TAG_ALREADY_EXISTS));
        }
        Err(e) => return Err(e.into()),
    }

    if name != current.name {
        let memos =
            rewrite_memo_tags(&ctx.stores.vectors, &user.id, &current.name, Some(&name)).await?;
        tracing::info!(from = %current.name, to = %name, memos, "tag renamed");
    }
    tx.commit().await?;

    get_tag(pool, user, id).await
}

pub async fn delete_tag(ctx: &AppContext, user: &AuthUser, id: &str) -> AppResult<()> {
    let pool = &ctx.stores.relational;
    let current = get_tag(pool, user, id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM tags WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let memos = rewrite_memo_tags(&ctx.stores.vectors, &user.id, &current.name, None).await?;
    tx.commit().await?;

    tracing::info!(tag = %current.name, memos, "tag deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replace_tag_rename() {
        assert_eq!(
            replace_tag(&strings(&["a", "b", "c"]), "b", Some("x")),
            strings(&["a", "x", "c"])
        );
    }

    #[test]
    fn test_replace_tag_merges_duplicates() {
        assert_eq!(
            replace_tag(&strings(&["a", "b"]), "b", Some("a")),
            strings(&["a"])
        );
    }

    #[test]
    fn test_replace_tag_remove() {
        assert_eq!(replace_tag(&strings(&["a", "b"]), "a", None), strings(&["b"]));
    }
}
