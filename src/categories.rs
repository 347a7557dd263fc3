//! Memo categories. Names are unique per user.

use serde::Deserialize;
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, Category};
use crate::response::ErrorCode;

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    /// `""` clears the color.
    pub color: Option<String>,
}

fn category_from_row(row: &sqlx::sqlite::SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        color: row.get("color"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn clean_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn map_conflict(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::business(ErrorCode::CATEGORY_ALREADY_EXISTS)
    } else {
        e.into()
    }
}

pub async fn list_categories(pool: &SqlitePool, user: &AuthUser) -> AppResult<Vec<Category>> {
    let rows = sqlx::query(
        "SELECT id, name, color, created_at, updated_at FROM categories WHERE user_id = ? ORDER BY name",
    )
    .bind(&user.id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(category_from_row).collect())
}

pub async fn get_category(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Category> {
    let row = sqlx::query(
        "SELECT id, name, color, created_at, updated_at FROM categories WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::CATEGORY_NOT_FOUND))?;
    Ok(category_from_row(&row))
}

pub async fn create_category(
    pool: &SqlitePool,
    user: &AuthUser,
    req: CreateCategoryRequest,
) -> AppResult<Category> {
    let name = clean_name(&req.name)?;
    let id = new_id();
    let now = now_ts();

    sqlx::query(
        "INSERT INTO categories (id, user_id, name, color, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&name)
    .bind(req.color.filter(|c| !c.is_empty()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(map_conflict)?;

    get_category(pool, user, &id).await
}

pub async fn update_category(
    pool: &SqlitePool,
    user: &AuthUser,
    id: &str,
    req: UpdateCategoryRequest,
) -> AppResult<Category> {
    let current = get_category(pool, user, id).await?;
    let name = match req.name {
        Some(n) => clean_name(&n)?,
        None => current.name,
    };
    let color = match req.color {
        Some(c) if c.is_empty() => None,
        Some(c) => Some(c),
        None => current.color,
    };

    sqlx::query("UPDATE categories SET name = ?, color = ?, updated_at = ? WHERE id = ? AND user_id = ?")
        .bind(&name)
        .bind(&color)
        .bind(now_ts())
        .bind(id)
        .bind(&user.id)
        .execute(pool)
        .await
        .map_err(map_conflict)?;

    get_category(pool, user, id).await
}

/// Delete the category and detach its memos.
pub async fn delete_category(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<()> {
    get_category(pool, user, id).await?;

    let mut tx = pool.begin().await?;
    let detached = sqlx::query("UPDATE memos SET category_id = NULL WHERE category_id = ? AND user_id = ?")
        .bind(id)
        .bind(&user.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::debug!(category = %id, detached, "category deleted");
    Ok(())
}
