//! AI conversations.
//!
//! A conversation is an ordered list of user and assistant turns. Sending a
//! message replays the recent history (and the linked memo, if any) to the
//! chat model and stores both the question and the reply.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::embedding::ChatMessage;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, AiMessage, Conversation};
use crate::response::ErrorCode;

/// Turns replayed to the model per request.
const HISTORY_LIMIT: i64 = 20;
const DEFAULT_TITLE: &str = "New conversation";
const TITLE_CHARS: usize = 40;

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub memo_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<AiMessage>,
}

#[derive(Debug, Serialize)]
pub struct Exchange {
    pub question: AiMessage,
    pub answer: AiMessage,
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        title: row.get("title"),
        memo_id: row.get("memo_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> AiMessage {
    AiMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: row.get("role"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

pub async fn list_conversations(pool: &SqlitePool, user: &AuthUser) -> AppResult<Vec<Conversation>> {
    let rows = sqlx::query(
        "SELECT id, title, memo_id, created_at, updated_at FROM ai_conversations WHERE user_id = ? ORDER BY updated_at DESC",
    )
    .bind(&user.id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(conversation_from_row).collect())
}

async fn get_conversation(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<Conversation> {
    let row = sqlx::query(
        "SELECT id, title, memo_id, created_at, updated_at FROM ai_conversations WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::CONVERSATION_NOT_FOUND))?;
    Ok(conversation_from_row(&row))
}

async fn messages(pool: &SqlitePool, conversation_id: &str) -> AppResult<Vec<AiMessage>> {
    let rows = sqlx::query(
        "SELECT id, conversation_id, role, content, created_at FROM ai_messages WHERE conversation_id = ? ORDER BY created_at, rowid",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(message_from_row).collect())
}

pub async fn get_detail(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<ConversationDetail> {
    let conversation = get_conversation(pool, user, id).await?;
    let messages = messages(pool, id).await?;
    Ok(ConversationDetail {
        conversation,
        messages,
    })
}

pub async fn create_conversation(
    pool: &SqlitePool,
    user: &AuthUser,
    req: CreateConversationRequest,
) -> AppResult<Conversation> {
    let memo_id = req.memo_id.filter(|m| !m.is_empty());
    if let Some(ref memo_id) = memo_id {
        crate::memos::get_memo(pool, user, memo_id).await?;
    }
    let title = req
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let id = new_id();
    let now = now_ts();
    sqlx::query(
        "INSERT INTO ai_conversations (id, user_id, title, memo_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&title)
    .bind(&memo_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_conversation(pool, user, &id).await
}

pub async fn delete_conversation(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<()> {
    get_conversation(pool, user, id).await?;
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM ai_messages WHERE conversation_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM ai_conversations WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

fn system_prompt(language: &str, memo: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a helpful assistant inside a personal note-taking app. Answer in the language {}.",
        language
    );
    if let Some(memo) = memo {
        prompt.push_str("\n\nThe user is asking about this note:\n\n");
        prompt.push_str(memo);
    }
    prompt
}

/// Build the model input: system prompt, last turns, new question.
fn build_prompt(system: String, history: &[AiMessage], question: &str) -> Vec<ChatMessage> {
    let skip = history.len().saturating_sub(HISTORY_LIMIT as usize);
    std::iter::once(ChatMessage::system(system))
        .chain(history[skip..].iter().map(|m| match m.role.as_str() {
            "assistant" => ChatMessage::assistant(m.content.clone()),
            _ => ChatMessage::user(m.content.clone()),
        }))
        .chain(std::iter::once(ChatMessage::user(question)))
        .collect()
}

pub async fn send_message(
    ctx: &AppContext,
    user: &AuthUser,
    id: &str,
    req: SendMessageRequest,
) -> AppResult<Exchange> {
    if !ctx.ai.is_enabled() {
        return Err(AppError::business(ErrorCode::AI_DISABLED));
    }
    let question = req.content.trim();
    if question.is_empty() {
        return Err(AppError::Validation("content must not be empty".into()));
    }

    let pool = &ctx.stores.vectors;
    let conversation = get_conversation(pool, user, id).await?;
    let history = messages(pool, id).await?;

    let memo = match conversation.memo_id {
        Some(ref memo_id) => crate::memos::get_memo(pool, user, memo_id)
            .await
            .ok()
            .map(|m| m.content),
        None => None,
    };

    let prompt = build_prompt(
        system_prompt(&ctx.config.locale.language, memo.as_deref()),
        &history,
        question,
    );
    let reply = ctx
        .ai
        .chat(&prompt)
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::AI_SERVICE_ERROR, e.to_string()))?;

    let now = now_ts();
    let question = AiMessage {
        id: new_id(),
        conversation_id: id.to_string(),
        role: "user".to_string(),
        content: question.to_string(),
        created_at: now,
    };
    let answer = AiMessage {
        id: new_id(),
        conversation_id: id.to_string(),
        role: "assistant".to_string(),
        content: reply,
        created_at: now,
    };

    let mut tx = pool.begin().await?;
    for msg in [&question, &answer] {
        sqlx::query(
            "INSERT INTO ai_messages (id, conversation_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(msg.created_at)
        .execute(&mut *tx)
        .await?;
    }

    let title = if history.is_empty() && conversation.title == DEFAULT_TITLE {
        question.content.chars().take(TITLE_CHARS).collect()
    } else {
        conversation.title
    };
    sqlx::query("UPDATE ai_conversations SET title = ?, updated_at = ? WHERE id = ?")
        .bind(&title)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Exchange { question, answer })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> AiMessage {
        AiMessage {
            id: new_id(),
            conversation_id: "c".into(),
            role: role.into(),
            content: content.into(),
            created_at: 0,
        }
    }

    #[test]
    fn test_prompt_order() {
        let history = vec![msg("user", "hi"), msg("assistant", "hello")];
        let prompt = build_prompt("sys".into(), &history, "next");
        let roles: Vec<_> = prompt.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(prompt[3].content, "next");
    }

    #[test]
    fn test_prompt_history_is_bounded() {
        let history: Vec<_> = (0..50).map(|i| msg("user", &i.to_string())).collect();
        let prompt = build_prompt("sys".into(), &history, "q");
        assert_eq!(prompt.len(), HISTORY_LIMIT as usize + 2);
        assert_eq!(prompt[1].content, "30");
    }

    #[test]
    fn test_system_prompt_includes_memo() {
        assert!(system_prompt("zh-CN", Some("buy milk")).contains("buy milk"));
        assert!(!system_prompt("zh-CN", None).contains("note:"));
    }
}
