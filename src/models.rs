//! Core data models shared by the services and the HTTP layer.
//!
//! Timestamps are stored as Unix seconds and serialised as ISO-8601 UTC.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub nickname: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
    #[serde(serialize_with = "ts::iso_opt")]
    pub last_login_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub usage_count: i64,
    pub color: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Memo {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub is_pinned: bool,
    pub is_public: bool,
    pub ai_summary: Option<String>,
    pub has_embedding: bool,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
}

/// A memo paired with its similarity to a query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemo {
    pub score: f32,
    pub memo: Memo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub id: String,
    pub memo_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub ocr_text: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushRule {
    pub id: String,
    pub name: String,
    pub webhook_url: String,
    pub events: Vec<String>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub has_secret: bool,
    pub enabled: bool,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushDelivery {
    pub id: String,
    pub rule_id: String,
    pub event: String,
    pub status_code: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub memo_id: Option<String>,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
    #[serde(serialize_with = "ts::iso")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) mod ts {
    use serde::Serializer;

    pub fn format_iso(ts: i64) -> String {
        chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| ts.to_string())
    }

    pub fn iso<S: Serializer>(ts: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_iso(*ts))
    }

    pub fn iso_opt<S: Serializer>(ts: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&format_iso(*ts)),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_serialise_as_iso() {
        let tag = Tag {
            id: "t".into(),
            name: "rust".into(),
            usage_count: 2,
            color: None,
            created_at: 0,
            updated_at: 86_400,
        };
        let value = serde_json::to_value(&tag).unwrap();
        assert_eq!(value["created_at"], "1970-01-01T00:00:00Z");
        assert_eq!(value["updated_at"], "1970-01-02T00:00:00Z");
    }

    #[test]
    fn test_secrets_not_serialised() {
        let rule = PushRule {
            id: "r".into(),
            name: "n".into(),
            webhook_url: "http://x".into(),
            events: vec![],
            secret: Some("s3cr3t".into()),
            has_secret: true,
            enabled: true,
            created_at: 0,
            updated_at: 0,
        };
        let text = serde_json::to_string(&rule).unwrap();
        assert!(!text.contains("s3cr3t"));
        assert!(text.contains("\"has_secret\":true"));
    }
}
