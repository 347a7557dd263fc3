//! Memo service.
//!
//! Memos live in the vector store next to their embeddings; tag usage
//! counts live in the relational store. A memo write therefore touches two
//! databases. The relational transaction that adjusts tag counts is opened
//! first and committed last, so a failed memo write simply rolls it back.
//! If the commit itself fails after the memo was written, the memo write is
//! undone.
//!
//! Embeddings are computed in a background task after the write returns. The
//! stored vector is only written while the memo still has the content it was
//! computed from.
//!
//! Tags are the union of the tags sent by the client and the `#hashtags`
//! found in the content, deduplicated in first-seen order.
//!
//! Recommendations use cosine similarity over the caller's memo vectors,
//! computed in Rust after loading the BLOBs, as with any other vector scan
//! in this crate.

use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;

use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_cached, vec_to_blob, ChatMessage};
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, Memo, Page, ScoredMemo};
use crate::push::{EVENT_MEMO_CREATED, EVENT_MEMO_DELETED, EVENT_MEMO_UPDATED};
use crate::response::ErrorCode;

const MAX_TAG_LEN: usize = 64;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateMemoRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_public: bool,
}

/// Absent fields are left unchanged. `category_id: ""` clears the category.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMemoRequest {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<String>,
    pub is_pinned: Option<bool>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub tag: Option<String>,
    pub category_id: Option<String>,
    pub keyword: Option<String>,
    pub pinned: Option<bool>,
}

// ============ Tags ============

/// `#tag` tokens that start a word. `#` alone or `# heading` is not a tag.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = content.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_word_start = prev.map_or(true, char::is_whitespace);
        prev = Some(c);
        if c != '#' || !at_word_start {
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_alphanumeric() || matches!(next, '_' | '-' | '/') {
                end = j + next.len_utf8();
                prev = Some(next);
                chars.next();
            } else {
                break;
            }
        }
        let tag = content[start..end].trim_end_matches(['-', '/']);
        if !tag.is_empty() {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().trim_start_matches('#').trim();
    (!tag.is_empty()).then(|| tag.chars().take(MAX_TAG_LEN).collect())
}

/// Explicit tags followed by content hashtags, deduplicated in order.
pub fn merge_tags(explicit: &[String], content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    explicit
        .iter()
        .filter_map(|t| normalize_tag(t))
        .chain(extract_hashtags(content).into_iter().filter_map(|t| normalize_tag(&t)))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// `(added, removed)` going from `old` to `new`.
pub fn tag_diff(old: &[String], new: &[String]) -> (Vec<String>, Vec<String>) {
    let added = new.iter().filter(|t| !old.contains(t)).cloned().collect();
    let removed = old.iter().filter(|t| !new.contains(t)).cloned().collect();
    (added, removed)
}

/// Adjust usage counts inside an open relational transaction.
async fn apply_tag_changes(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    added: &[String],
    removed: &[String],
) -> Result<(), sqlx::Error> {
    let now = now_ts();
    for name in added {
        sqlx::query(
            r#"
            INSERT INTO tags (id, user_id, name, usage_count, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(user_id, name) DO UPDATE SET
                usage_count = usage_count + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    for name in removed {
        sqlx::query(
            "UPDATE tags SET usage_count = MAX(usage_count - 1, 0), updated_at = ? WHERE user_id = ? AND name = ?",
        )
        .bind(now)
        .bind(user_id)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

// ============ Rows ============

const MEMO_COLUMNS: &str = "id, user_id, content, tags, category_id, is_pinned, is_public, \
     ai_summary, embedding IS NOT NULL AS has_embedding, created_at, updated_at";

fn memo_from_row(row: &sqlx::sqlite::SqliteRow) -> Memo {
    let tags: String = row.get("tags");
    Memo {
        id: row.get("id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        category_id: row.get("category_id"),
        is_pinned: row.get("is_pinned"),
        is_public: row.get("is_public"),
        ai_summary: row.get("ai_summary"),
        has_embedding: row.get("has_embedding"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn tags_json(tags: &[String]) -> AppResult<String> {
    Ok(serde_json::to_string(tags).map_err(anyhow::Error::from)?)
}

pub async fn get_memo(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Memo> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM memos WHERE id = ? AND user_id = ?",
        MEMO_COLUMNS
    ))
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::MEMO_NOT_FOUND))?;
    Ok(memo_from_row(&row))
}

/// Read a memo without authentication; only public memos are visible.
pub async fn get_public_memo(pool: &SqlitePool, id: &str) -> AppResult<Memo> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM memos WHERE id = ? AND is_public = 1",
        MEMO_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::MEMO_NOT_FOUND))?;
    Ok(memo_from_row(&row))
}

async fn ensure_category(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<()> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM categories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(&user.id)
            .fetch_optional(pool)
            .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::business(ErrorCode::CATEGORY_NOT_FOUND))
}

fn require_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::business(ErrorCode::MEMO_CONTENT_EMPTY));
    }
    Ok(())
}

// ============ Writes ============

pub async fn create_memo(
    ctx: &AppContext,
    user: &AuthUser,
    req: CreateMemoRequest,
) -> AppResult<Memo> {
    require_content(&req.content)?;
    let vectors = &ctx.stores.vectors;
    let category_id = req.category_id.filter(|c| !c.is_empty());
    if let Some(ref category_id) = category_id {
        ensure_category(vectors, user, category_id).await?;
    }

    let tags = merge_tags(&req.tags, &req.content);
    let id = new_id();
    let now = now_ts();

    let mut tx = ctx.stores.relational.begin().await?;
    apply_tag_changes(&mut tx, &user.id, &tags, &[]).await?;

    sqlx::query(
        r#"
        INSERT INTO memos (id, user_id, content, tags, category_id, is_pinned, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&req.content)
    .bind(tags_json(&tags)?)
    .bind(&category_id)
    .bind(req.is_pinned)
    .bind(req.is_public)
    .bind(now)
    .bind(now)
    .execute(vectors)
    .await?;

    if let Err(e) = tx.commit().await {
        tracing::error!(memo = %id, error = %e, "tag update failed, removing memo");
        sqlx::query("DELETE FROM memos WHERE id = ?")
            .bind(&id)
            .execute(vectors)
            .await?;
        return Err(e.into());
    }

    spawn_embedding(ctx, &id, &req.content);

    let memo = get_memo(vectors, user, &id).await?;
    ctx.push
        .dispatch(&user.id, EVENT_MEMO_CREATED, json!(memo));
    Ok(memo)
}

const UPDATE_MEMO: &str = "UPDATE memos \
     SET content = ?, tags = ?, category_id = ?, is_pinned = ?, is_public = ?, updated_at = ? \
     WHERE id = ? AND user_id = ?";

/// Same as [`UPDATE_MEMO`], also dropping data derived from the old content.
const UPDATE_MEMO_RESET_AI: &str = "UPDATE memos \
     SET content = ?, tags = ?, category_id = ?, is_pinned = ?, is_public = ?, updated_at = ?, \
         embedding = NULL, embedding_model = NULL, ai_summary = NULL \
     WHERE id = ? AND user_id = ?";

/// A memo row as it was before an update, derived columns included.
struct MemoSnapshot {
    memo: Memo,
    embedding: Option<Vec<u8>>,
    embedding_model: Option<String>,
}

impl MemoSnapshot {
    async fn take(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Self> {
        let row = sqlx::query(&format!(
            "SELECT {}, embedding, embedding_model FROM memos WHERE id = ? AND user_id = ?",
            MEMO_COLUMNS
        ))
        .bind(id)
        .bind(&user.id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::business(ErrorCode::MEMO_NOT_FOUND))?;
        Ok(Self {
            memo: memo_from_row(&row),
            embedding: row.get("embedding"),
            embedding_model: row.get("embedding_model"),
        })
    }

    async fn restore(&self, pool: &SqlitePool) -> AppResult<()> {
        let memo = &self.memo;
        sqlx::query(
            r#"
            UPDATE memos
            SET content = ?, tags = ?, category_id = ?, is_pinned = ?, is_public = ?, updated_at = ?,
                embedding = ?, embedding_model = ?, ai_summary = ?
            WHERE id = ?
            "#,
        )
        .bind(&memo.content)
        .bind(tags_json(&memo.tags)?)
        .bind(&memo.category_id)
        .bind(memo.is_pinned)
        .bind(memo.is_public)
        .bind(memo.updated_at)
        .bind(&self.embedding)
        .bind(&self.embedding_model)
        .bind(&memo.ai_summary)
        .bind(&memo.id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

pub async fn update_memo(
    ctx: &AppContext,
    user: &AuthUser,
    id: &str,
    req: UpdateMemoRequest,
) -> AppResult<Memo> {
    let vectors = &ctx.stores.vectors;
    let snapshot = MemoSnapshot::take(vectors, user, id).await?;
    let current = &snapshot.memo;

    let content = req.content.unwrap_or_else(|| current.content.clone());
    require_content(&content)?;
    let content_changed = content != current.content;

    let category_id = match req.category_id {
        Some(c) if c.is_empty() => None,
        Some(c) => {
            ensure_category(vectors, user, &c).await?;
            Some(c)
        }
        None => current.category_id.clone(),
    };

    // Without explicit tags, keep the ones that did not come from the old content.
    let explicit = req.tags.unwrap_or_else(|| {
        let old_hashtags = extract_hashtags(&current.content);
        current
            .tags
            .iter()
            .filter(|t| !old_hashtags.contains(t))
            .cloned()
            .collect()
    });
    let tags = merge_tags(&explicit, &content);
    let (added, removed) = tag_diff(&current.tags, &tags);

    let mut tx = ctx.stores.relational.begin().await?;
    apply_tag_changes(&mut tx, &user.id, &added, &removed).await?;

    let sql = if content_changed {
        UPDATE_MEMO_RESET_AI
    } else {
        UPDATE_MEMO
    };
    sqlx::query(sql)
        .bind(&content)
        .bind(tags_json(&tags)?)
        .bind(&category_id)
        .bind(req.is_pinned.unwrap_or(current.is_pinned))
        .bind(req.is_public.unwrap_or(current.is_public))
        .bind(now_ts())
        .bind(id)
        .bind(&user.id)
        .execute(vectors)
        .await?;

    if let Err(e) = tx.commit().await {
        tracing::error!(memo = %id, error = %e, "tag update failed, restoring memo");
        snapshot.restore(vectors).await?;
        return Err(e.into());
    }

    if content_changed {
        spawn_embedding(ctx, id, &content);
    }

    let memo = get_memo(vectors, user, id).await?;
    ctx.push
        .dispatch(&user.id, EVENT_MEMO_UPDATED, json!(memo));
    Ok(memo)
}

pub async fn delete_memo(ctx: &AppContext, user: &AuthUser, id: &str) -> AppResult<()> {
    let vectors = &ctx.stores.vectors;
    let current = get_memo(vectors, user, id).await?;

    let mut tx = ctx.stores.relational.begin().await?;
    apply_tag_changes(&mut tx, &user.id, &[], &current.tags).await?;

    sqlx::query("DELETE FROM memos WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(&user.id)
        .execute(vectors)
        .await?;
    sqlx::query("UPDATE attachments SET memo_id = NULL WHERE memo_id = ?")
        .bind(id)
        .execute(vectors)
        .await?;

    if let Err(e) = tx.commit().await {
        tracing::error!(memo = %id, error = %e, "tag counts not updated after memo delete");
    }

    ctx.push.dispatch(
        &user.id,
        EVENT_MEMO_DELETED,
        json!({ "id": id, "tags": current.tags }),
    );
    Ok(())
}

// ============ Listing ============

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, user: &AuthUser, q: &ListQuery) {
    qb.push(" WHERE user_id = ").push_bind(user.id.clone());
    if let Some(tag) = q.tag.as_deref().and_then(normalize_tag) {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(memos.tags) WHERE json_each.value = ")
            .push_bind(tag)
            .push(")");
    }
    if let Some(category_id) = q.category_id.as_deref().filter(|c| !c.is_empty()) {
        qb.push(" AND category_id = ").push_bind(category_id.to_string());
    }
    if let Some(keyword) = q.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        qb.push(" AND content LIKE ")
            .push_bind(format!("%{}%", escaped))
            .push(" ESCAPE '\\'");
    }
    if let Some(pinned) = q.pinned {
        qb.push(" AND is_pinned = ").push_bind(pinned);
    }
}

fn page_offset(page: i64, page_size: i64) -> AppResult<i64> {
    (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| AppError::Validation("page is out of range".into()))
}

pub async fn list_memos(pool: &SqlitePool, user: &AuthUser, q: &ListQuery) -> AppResult<Page<Memo>> {
    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(20);
    if page < 1 || !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(AppError::Validation(format!(
            "page must be >= 1 and page_size in 1..={}",
            MAX_PAGE_SIZE
        )));
    }

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM memos");
    push_filters(&mut count, user, q);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM memos", MEMO_COLUMNS));
    push_filters(&mut select, user, q);
    select
        .push(" ORDER BY is_pinned DESC, created_at DESC, id LIMIT ")
        .push_bind(page_size)
        .push(" OFFSET ")
        .push_bind(page_offset(page, page_size)?);
    let rows = select.build().fetch_all(pool).await?;

    Ok(Page {
        items: rows.iter().map(memo_from_row).collect(),
        total,
        page,
        page_size,
    })
}

// ============ AI ============

fn require_ai(ctx: &AppContext) -> AppResult<()> {
    if !ctx.ai.is_enabled() {
        return Err(AppError::business(ErrorCode::AI_DISABLED));
    }
    Ok(())
}

/// Embed and store off the request path; failures are logged, never returned.
fn spawn_embedding(ctx: &AppContext, id: &str, content: &str) {
    if !ctx.ai.is_enabled() {
        return;
    }
    let ctx = ctx.clone();
    let id = id.to_string();
    let content = content.to_string();
    tokio::spawn(async move {
        if let Err(e) = store_embedding(&ctx, &id, &content).await {
            tracing::warn!(memo = %id, error = %e, "embedding failed");
        }
    });
}

/// A memo edited since `content` was read keeps its newer state.
async fn store_embedding(ctx: &AppContext, id: &str, content: &str) -> anyhow::Result<Vec<f32>> {
    let vector = embed_cached(&ctx.stores.vectors, ctx.ai.as_ref(), content).await?;
    sqlx::query("UPDATE memos SET embedding = ?, embedding_model = ? WHERE id = ? AND content = ?")
        .bind(vec_to_blob(&vector))
        .bind(ctx.ai.embedding_model())
        .bind(id)
        .bind(content)
        .execute(&ctx.stores.vectors)
        .await?;
    Ok(vector)
}

/// Rank the user's embedded memos by similarity to `query`.
async fn nearest(
    ctx: &AppContext,
    user: &AuthUser,
    query: &[f32],
    exclude: Option<&str>,
    limit: usize,
) -> AppResult<Vec<ScoredMemo>> {
    let rows = sqlx::query(&format!(
        "SELECT {}, embedding FROM memos WHERE user_id = ? AND embedding IS NOT NULL AND embedding_model = ?",
        MEMO_COLUMNS
    ))
    .bind(&user.id)
    .bind(ctx.ai.embedding_model())
    .fetch_all(&ctx.stores.vectors)
    .await?;

    let mut scored: Vec<ScoredMemo> = rows
        .iter()
        .filter(|row| exclude != Some(row.get::<&str, _>("id")))
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            ScoredMemo {
                score: cosine_similarity(query, &blob_to_vec(&blob)),
                memo: memo_from_row(row),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    Ok(scored)
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(5).clamp(1, 50)
}

/// Memos most similar to memo `id`, excluding itself.
pub async fn related_memos(
    ctx: &AppContext,
    user: &AuthUser,
    id: &str,
    limit: Option<usize>,
) -> AppResult<Vec<ScoredMemo>> {
    require_ai(ctx)?;
    let memo = get_memo(&ctx.stores.vectors, user, id).await?;

    let vector = store_embedding(ctx, &memo.id, &memo.content)
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::AI_SERVICE_ERROR, e.to_string()))?;
    nearest(ctx, user, &vector, Some(&memo.id), clamp_limit(limit)).await
}

pub async fn semantic_search(
    ctx: &AppContext,
    user: &AuthUser,
    query: &str,
    limit: Option<usize>,
) -> AppResult<Vec<ScoredMemo>> {
    require_ai(ctx)?;
    if query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".into()));
    }
    let vector = embed_cached(&ctx.stores.vectors, ctx.ai.as_ref(), query.trim())
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::AI_SERVICE_ERROR, e.to_string()))?;
    nearest(ctx, user, &vector, None, clamp_limit(limit)).await
}

fn annotation_prompt(language: &str) -> String {
    format!(
        "You annotate personal notes. Summarise the note in at most three sentences, \
         then suggest up to three short tags as #hashtags. Answer in the language {}.",
        language
    )
}

/// Summarise a memo with the chat model and store the result.
pub async fn annotate_memo(ctx: &AppContext, user: &AuthUser, id: &str) -> AppResult<Memo> {
    require_ai(ctx)?;
    let memo = get_memo(&ctx.stores.vectors, user, id).await?;

    let summary = ctx
        .ai
        .chat(&[
            ChatMessage::system(annotation_prompt(&ctx.config.locale.language)),
            ChatMessage::user(memo.content.clone()),
        ])
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::AI_SERVICE_ERROR, e.to_string()))?;

    sqlx::query("UPDATE memos SET ai_summary = ? WHERE id = ?")
        .bind(&summary)
        .bind(id)
        .execute(&ctx.stores.vectors)
        .await?;

    get_memo(&ctx.stores.vectors, user, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_hashtags() {
        assert_eq!(
            extract_hashtags("#rust is fun #读书笔记 and #a/b-"),
            strings(&["rust", "读书笔记", "a/b"])
        );
    }

    #[test]
    fn test_headings_and_anchors_are_not_tags() {
        assert!(extract_hashtags("# Heading\n## Sub").is_empty());
        assert!(extract_hashtags("see http://x.io/#frag and a#b").is_empty());
        assert_eq!(extract_hashtags("line\n#next"), strings(&["next"]));
    }

    #[test]
    fn test_merge_tags_dedup_in_order() {
        let tags = merge_tags(&strings(&["#work", " ideas ", "", "work"]), "note #ideas #todo");
        assert_eq!(tags, strings(&["work", "ideas", "todo"]));
    }

    #[test]
    fn test_tag_diff() {
        let (added, removed) = tag_diff(&strings(&["a", "b"]), &strings(&["b", "c"]));
        assert_eq!(added, strings(&["c"]));
        assert_eq!(removed, strings(&["a"]));
    }

    #[test]
    fn test_long_tags_truncated() {
        let long = "x".repeat(100);
        assert_eq!(normalize_tag(&long).unwrap().chars().count(), MAX_TAG_LEN);
    }

    #[test]
    fn test_long_hashtags_truncated() {
        let content = format!("note #{}", "y".repeat(100));
        let tags = merge_tags(&[], &content);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].chars().count(), MAX_TAG_LEN);
    }

    #[test]
    fn test_page_offset_overflow() {
        assert_eq!(page_offset(3, 20).unwrap(), 40);
        assert!(matches!(
            page_offset(i64::MAX, MAX_PAGE_SIZE),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_restores_derived_fields() {
        let pool = crate::migrate::test_pool().await;
        crate::migrate::run_migrations(&pool, &pool).await.unwrap();
        sqlx::query(
            "INSERT INTO memos (id, user_id, content, tags, is_pinned, is_public, ai_summary, \
             embedding, embedding_model, created_at, updated_at) \
             VALUES ('m1', 'u1', 'old text', '[\"a\"]', 0, 0, 'summary', ?, 'model-a', 1, 1)",
        )
        .bind(vec_to_blob(&[1.0, 2.0]))
        .execute(&pool)
        .await
        .unwrap();

        let user = AuthUser {
            id: "u1".into(),
            username: "ada".into(),
        };
        let snapshot = MemoSnapshot::take(&pool, &user, "m1").await.unwrap();

        sqlx::query(UPDATE_MEMO_RESET_AI)
            .bind("new text")
            .bind("[]")
            .bind(None::<String>)
            .bind(true)
            .bind(true)
            .bind(5_i64)
            .bind("m1")
            .bind("u1")
            .execute(&pool)
            .await
            .unwrap();

        snapshot.restore(&pool).await.unwrap();

        let restored = MemoSnapshot::take(&pool, &user, "m1").await.unwrap();
        assert_eq!(restored.memo.content, "old text");
        assert_eq!(restored.memo.tags, strings(&["a"]));
        assert!(!restored.memo.is_pinned);
        assert_eq!(restored.memo.updated_at, 1);
        assert_eq!(restored.memo.ai_summary.as_deref(), Some("summary"));
        assert_eq!(restored.embedding_model.as_deref(), Some("model-a"));
        assert_eq!(blob_to_vec(&restored.embedding.unwrap()), vec![1.0, 2.0]);
    }
}
