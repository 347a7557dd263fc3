//! Attachment upload and retrieval.
//!
//! Uploads arrive as JSON with a base64 body, are written to object storage
//! under `attachments/<user id>/<attachment id>`, and are indexed in the
//! `attachments` table of the vector store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, Attachment};
use crate::response::ErrorCode;
use crate::storage::content_type_for;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    /// Guessed from the filename when absent.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL.
    pub data: String,
    #[serde(default)]
    pub memo_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAttachmentsQuery {
    pub memo_id: Option<String>,
}

/// Decode base64 or a base64 `data:` URL. Returns the bytes and the URL's MIME type.
pub fn decode_payload(data: &str) -> AppResult<(Vec<u8>, Option<String>)> {
    let (mime, encoded) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (meta, encoded) = rest
                .split_once(',')
                .ok_or_else(|| AppError::Validation("malformed data URL".into()))?;
            let mime = meta.strip_suffix(";base64").ok_or_else(|| {
                AppError::Validation("data URL must be base64 encoded".into())
            })?;
            (Some(mime.to_string()).filter(|m| !m.is_empty()), encoded)
        }
        None => (None, data),
    };
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|e| AppError::Validation(format!("invalid base64 data: {}", e)))?;
    Ok((bytes, mime))
}

fn attachment_from_row(row: &sqlx::sqlite::SqliteRow) -> Attachment {
    Attachment {
        id: row.get("id"),
        memo_id: row.get("memo_id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        size: row.get("size"),
        storage_key: row.get("storage_key"),
        ocr_text: row.get("ocr_text"),
        created_at: row.get("created_at"),
    }
}

const ATTACHMENT_COLUMNS: &str =
    "id, memo_id, filename, content_type, size, storage_key, ocr_text, created_at";

pub async fn get_attachment(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Attachment> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM attachments WHERE id = ? AND user_id = ?",
        ATTACHMENT_COLUMNS
    ))
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::ATTACHMENT_NOT_FOUND))?;
    Ok(attachment_from_row(&row))
}

pub async fn list_attachments(
    pool: &SqlitePool,
    user: &AuthUser,
    query: &ListAttachmentsQuery,
) -> AppResult<Vec<Attachment>> {
    let rows = match query.memo_id.as_deref() {
        Some(memo_id) => {
            sqlx::query(&format!(
                "SELECT {} FROM attachments WHERE user_id = ? AND memo_id = ? ORDER BY created_at DESC",
                ATTACHMENT_COLUMNS
            ))
            .bind(&user.id)
            .bind(memo_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM attachments WHERE user_id = ? ORDER BY created_at DESC",
                ATTACHMENT_COLUMNS
            ))
            .bind(&user.id)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(attachment_from_row).collect())
}

pub async fn upload(ctx: &AppContext, user: &AuthUser, req: UploadRequest) -> AppResult<Attachment> {
    let filename = req.filename.trim().to_string();
    if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
        return Err(AppError::Validation("invalid filename".into()));
    }

    let (bytes, url_mime) = decode_payload(&req.data)?;
    if bytes.is_empty() {
        return Err(AppError::Validation("attachment is empty".into()));
    }
    let limit = ctx.config.storage.max_upload_bytes;
    if bytes.len() > limit {
        return Err(AppError::business_msg(
            ErrorCode::FILE_TOO_LARGE,
            format!("file exceeds {} bytes", limit),
        ));
    }

    let vectors = &ctx.stores.vectors;
    let memo_id = req.memo_id.filter(|m| !m.is_empty());
    if let Some(ref memo_id) = memo_id {
        crate::memos::get_memo(vectors, user, memo_id).await?;
    }

    let content_type = req
        .content_type
        .filter(|c| !c.is_empty())
        .or(url_mime)
        .unwrap_or_else(|| content_type_for(&filename).to_string());
    let id = new_id();
    let key = format!("attachments/{}/{}", user.id, id);
    let size = bytes.len() as i64;

    ctx.storage
        .put(&key, bytes, &content_type)
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::STORAGE_ERROR, e.to_string()))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO attachments (id, user_id, memo_id, filename, content_type, size, storage_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&memo_id)
    .bind(&filename)
    .bind(&content_type)
    .bind(size)
    .bind(&key)
    .bind(now_ts())
    .execute(vectors)
    .await;

    if let Err(e) = inserted {
        if let Err(cleanup) = ctx.storage.delete(&key).await {
            tracing::warn!(key = %key, error = %cleanup, "orphaned attachment object");
        }
        return Err(e.into());
    }

    tracing::debug!(attachment = %id, size, "attachment stored");
    get_attachment(vectors, user, &id).await
}

/// Metadata and raw bytes.
pub async fn read_content(
    ctx: &AppContext,
    user: &AuthUser,
    id: &str,
) -> AppResult<(Attachment, Vec<u8>)> {
    let attachment = get_attachment(&ctx.stores.vectors, user, id).await?;
    let bytes = ctx
        .storage
        .get(&attachment.storage_key)
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::STORAGE_ERROR, e.to_string()))?;
    Ok((attachment, bytes))
}

pub async fn delete_attachment(ctx: &AppContext, user: &AuthUser, id: &str) -> AppResult<()> {
    let attachment = get_attachment(&ctx.stores.vectors, user, id).await?;
    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(id)
        .execute(&ctx.stores.vectors)
        .await?;
    if let Err(e) = ctx.storage.delete(&attachment.storage_key).await {
        tracing::warn!(key = %attachment.storage_key, error = %e, "failed to delete attachment object");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        let (bytes, mime) = decode_payload("aGVs\nbG8=").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, None);
    }

    #[test]
    fn test_decode_data_url() {
        let (bytes, mime) = decode_payload("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_payload("data:image/png,hello").is_err());
        assert!(decode_payload("not base64!").is_err());
    }
}
