//! Push rules and webhook delivery.
//!
//! A rule subscribes a webhook URL to memo events. When an event fires, the
//! [`PushDispatcher`] spawns one task that posts to every matching rule and
//! records each attempt in `push_deliveries`. Delivery never blocks or fails
//! the request that triggered it, and one failing rule does not stop the
//! others. Each rule keeps its newest [`MAX_DELIVERIES_PER_RULE`] attempts.
//!
//! # Payload
//!
//! ```json
//! { "event": "memo.created", "timestamp": "2025-01-01T00:00:00Z", "data": { ... } }
//! ```
//!
//! Headers: `X-Memohub-Event: <event>` and, when the rule has a secret,
//! `X-Memohub-Signature: sha256=<hex HMAC-SHA256(secret, body)>`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, ts, PushDelivery, PushRule};
use crate::response::ErrorCode;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_MEMO_CREATED: &str = "memo.created";
pub const EVENT_MEMO_UPDATED: &str = "memo.updated";
pub const EVENT_MEMO_DELETED: &str = "memo.deleted";
pub const EVENT_TEST: &str = "push.test";

/// Events a rule may subscribe to. `*` matches all of them.
pub const MAX_DELIVERIES_PER_RULE: i64 = 200;

const KNOWN_EVENTS: &[&str] = &[EVENT_MEMO_CREATED, EVENT_MEMO_UPDATED, EVENT_MEMO_DELETED, "*"];

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub webhook_url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Absent fields are left unchanged; `secret: ""` clears the secret.
#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub webhook_url: Option<String>,
    pub events: Option<Vec<String>>,
    pub secret: Option<String>,
    pub enabled: Option<bool>,
}

fn validate_rule(name: &str, url: &str, events: &[String]) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::Validation(
            "webhook_url must be an http(s) URL".into(),
        ));
    }
    if events.is_empty() {
        return Err(AppError::Validation("events must not be empty".into()));
    }
    if let Some(bad) = events.iter().find(|e| !KNOWN_EVENTS.contains(&e.as_str())) {
        return Err(AppError::Validation(format!("unknown event: {}", bad)));
    }
    Ok(())
}

fn rule_from_row(row: &sqlx::sqlite::SqliteRow) -> PushRule {
    let events: String = row.get("events");
    let secret: Option<String> = row.get("secret");
    PushRule {
        id: row.get("id"),
        name: row.get("name"),
        webhook_url: row.get("webhook_url"),
        events: serde_json::from_str(&events).unwrap_or_default(),
        has_secret: secret.is_some(),
        secret,
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const RULE_COLUMNS: &str =
    "id, name, webhook_url, events, secret, enabled, created_at, updated_at";

pub async fn list_rules(pool: &SqlitePool, user: &AuthUser) -> AppResult<Vec<PushRule>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM push_rules WHERE user_id = ? ORDER BY created_at DESC",
        RULE_COLUMNS
    ))
    .bind(&user.id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(rule_from_row).collect())
}

pub async fn get_rule(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<PushRule> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM push_rules WHERE id = ? AND user_id = ?",
        RULE_COLUMNS
    ))
    .bind(id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::business(ErrorCode::PUSH_RULE_NOT_FOUND))?;
    Ok(rule_from_row(&row))
}

pub async fn create_rule(
    pool: &SqlitePool,
    user: &AuthUser,
    req: CreateRuleRequest,
) -> AppResult<PushRule> {
    validate_rule(&req.name, &req.webhook_url, &req.events)?;
    let id = new_id();
    let now = now_ts();
    let secret = req.secret.filter(|s| !s.is_empty());

    sqlx::query(
        r#"
        INSERT INTO push_rules (id, user_id, name, webhook_url, events, secret, enabled, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(req.name.trim())
    .bind(&req.webhook_url)
    .bind(serde_json::to_string(&req.events).map_err(anyhow::Error::from)?)
    .bind(&secret)
    .bind(req.enabled)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_rule(pool, user, &id).await
}

pub async fn update_rule(
    pool: &SqlitePool,
    user: &AuthUser,
    id: &str,
    req: UpdateRuleRequest,
) -> AppResult<PushRule> {
    let current = get_rule(pool, user, id).await?;
    let name = req.name.unwrap_or(current.name);
    let url = req.webhook_url.unwrap_or(current.webhook_url);
    let events = req.events.unwrap_or(current.events);
    validate_rule(&name, &url, &events)?;
    let secret = match req.secret {
        Some(s) if s.is_empty() => None,
        Some(s) => Some(s),
        None => current.secret,
    };
    let enabled = req.enabled.unwrap_or(current.enabled);

    sqlx::query(
        r#"
        UPDATE push_rules
        SET name = ?, webhook_url = ?, events = ?, secret = ?, enabled = ?, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(name.trim())
    .bind(&url)
    .bind(serde_json::to_string(&events).map_err(anyhow::Error::from)?)
    .bind(&secret)
    .bind(enabled)
    .bind(now_ts())
    .bind(id)
    .bind(&user.id)
    .execute(pool)
    .await?;

    get_rule(pool, user, id).await
}

pub async fn delete_rule(pool: &SqlitePool, user: &AuthUser, id: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM push_rules WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(&user.id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::business(ErrorCode::PUSH_RULE_NOT_FOUND));
    }
    sqlx::query("DELETE FROM push_deliveries WHERE rule_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_deliveries(
    pool: &SqlitePool,
    user: &AuthUser,
    rule_id: &str,
    limit: i64,
) -> AppResult<Vec<PushDelivery>> {
    get_rule(pool, user, rule_id).await?;
    let rows = sqlx::query(
        r#"
        SELECT id, rule_id, event, status_code, success, error, created_at
        FROM push_deliveries WHERE rule_id = ?
        ORDER BY created_at DESC, rowid DESC LIMIT ?
        "#,
    )
    .bind(rule_id)
    .bind(limit.clamp(1, MAX_DELIVERIES_PER_RULE))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PushDelivery {
            id: row.get("id"),
            rule_id: row.get("rule_id"),
            event: row.get("event"),
            status_code: row.get("status_code"),
            success: row.get("success"),
            error: row.get("error"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// `sha256=<hex>` over the exact request body.
pub fn signature_header(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook secret: {}", e))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Drop all but the newest `keep` deliveries of one rule.
async fn prune_deliveries(pool: &SqlitePool, rule_id: &str, keep: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM push_deliveries
        WHERE rule_id = ?1 AND rowid NOT IN (
            SELECT rowid FROM push_deliveries WHERE rule_id = ?1
            ORDER BY created_at DESC, rowid DESC LIMIT ?2
        )
        "#,
    )
    .bind(rule_id)
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

fn matches_event(rule: &PushRule, event: &str) -> bool {
    rule.enabled && rule.events.iter().any(|e| e == event || e == "*")
}

/// Fires webhook deliveries in the background.
#[derive(Clone)]
pub struct PushDispatcher {
    pool: SqlitePool,
    client: reqwest::Client,
}

impl PushDispatcher {
    pub fn new(pool: SqlitePool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { pool, client }
    }

    /// Deliver `event` to the user's matching rules without waiting.
    pub fn dispatch(&self, user_id: &str, event: &'static str, data: Value) {
        let this = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.dispatch_now(&user_id, event, data).await {
                tracing::warn!(event, error = %e, "webhook dispatch failed");
            }
        });
    }

    async fn dispatch_now(&self, user_id: &str, event: &str, data: Value) -> anyhow::Result<()> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM push_rules WHERE user_id = ? AND enabled = 1",
            RULE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        for rule in rows.iter().map(rule_from_row) {
            if !matches_event(&rule, event) {
                continue;
            }
            if let Err(e) = self.deliver(&rule, event, &data).await {
                tracing::warn!(rule = %rule.id, event, error = %e, "webhook delivery not recorded");
            }
        }
        Ok(())
    }

    /// POST one event to one rule and record the attempt.
    pub async fn deliver(
        &self,
        rule: &PushRule,
        event: &str,
        data: &Value,
    ) -> anyhow::Result<PushDelivery> {
        let now = now_ts();
        let body = serde_json::to_vec(&json!({
            "event": event,
            "timestamp": ts::format_iso(now),
            "data": data,
        }))?;

        let mut req = self
            .client
            .post(&rule.webhook_url)
            .header("Content-Type", "application/json")
            .header("X-Memohub-Event", event);
        if let Some(ref secret) = rule.secret {
            req = req.header("X-Memohub-Signature", signature_header(secret, &body)?);
        }

        let (status_code, success, error) = match req.body(body).send().await {
            Ok(resp) => {
                let status = resp.status();
                let error = (!status.is_success()).then(|| format!("HTTP {}", status));
                (Some(status.as_u16() as i64), status.is_success(), error)
            }
            Err(e) => (None, false, Some(e.to_string())),
        };

        if success {
            tracing::debug!(rule = %rule.id, event, "webhook delivered");
        } else {
            tracing::warn!(rule = %rule.id, event, error = ?error, "webhook delivery failed");
        }

        let delivery = PushDelivery {
            id: new_id(),
            rule_id: rule.id.clone(),
            event: event.to_string(),
            status_code,
            success,
            error,
            created_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO push_deliveries (id, rule_id, event, status_code, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.rule_id)
        .bind(&delivery.event)
        .bind(delivery.status_code)
        .bind(delivery.success)
        .bind(&delivery.error)
        .bind(delivery.created_at)
        .execute(&self.pool)
        .await?;

        let pruned = prune_deliveries(&self.pool, &rule.id, MAX_DELIVERIES_PER_RULE).await?;
        if pruned > 0 {
            tracing::debug!(rule = %rule.id, pruned, "old deliveries pruned");
        }

        Ok(delivery)
    }
}

/// Send a test event to one rule and wait for the result.
pub async fn test_rule(
    pool: &SqlitePool,
    dispatcher: &PushDispatcher,
    user: &AuthUser,
    id: &str,
) -> AppResult<PushDelivery> {
    let rule = get_rule(pool, user, id).await?;
    let delivery = dispatcher
        .deliver(
            &rule,
            EVENT_TEST,
            &json!({ "rule_id": rule.id, "message": "test delivery" }),
        )
        .await?;
    if !delivery.success {
        return Err(AppError::business_msg(
            ErrorCode::WEBHOOK_DELIVERY_FAILED,
            delivery
                .error
                .unwrap_or_else(|| ErrorCode::WEBHOOK_DELIVERY_FAILED.default_message().to_string()),
        ));
    }
    Ok(delivery)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(events: &[&str], enabled: bool) -> PushRule {
        PushRule {
            id: "r".into(),
            name: "n".into(),
            webhook_url: "http://localhost".into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            secret: None,
            has_secret: false,
            enabled,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_signature_header() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let sig = signature_header("key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_event_matching() {
        assert!(matches_event(&rule(&["memo.created"], true), "memo.created"));
        assert!(!matches_event(&rule(&["memo.created"], true), "memo.deleted"));
        assert!(matches_event(&rule(&["*"], true), "memo.deleted"));
        assert!(!matches_event(&rule(&["*"], false), "memo.deleted"));
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_per_rule() {
        let pool = crate::migrate::test_pool().await;
        crate::migrate::run_migrations(&pool, &pool).await.unwrap();
        for (i, rule_id) in ["r1", "r1", "r1", "r1", "r1", "r2", "r2"].iter().enumerate() {
            sqlx::query(
                "INSERT INTO push_deliveries (id, rule_id, event, success, created_at) VALUES (?, ?, 'memo.created', 1, ?)",
            )
            .bind(format!("d{}", i))
            .bind(*rule_id)
            .bind(i as i64)
            .execute(&pool)
            .await
            .unwrap();
        }

        assert_eq!(prune_deliveries(&pool, "r1", 3).await.unwrap(), 2);

        let kept: Vec<String> =
            sqlx::query_scalar("SELECT id FROM push_deliveries WHERE rule_id = 'r1' ORDER BY created_at")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(kept, vec!["d2", "d3", "d4"]);
        let others: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_deliveries WHERE rule_id = 'r2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(others, 2);
    }

    #[test]
    fn test_rule_validation() {
        let events = vec!["memo.created".to_string()];
        assert!(validate_rule("hook", "https://example.com/h", &events).is_ok());
        assert!(validate_rule("hook", "ftp://example.com", &events).is_err());
        assert!(validate_rule(" ", "https://example.com/h", &events).is_err());
        assert!(validate_rule("hook", "https://example.com/h", &[]).is_err());
        assert!(validate_rule("hook", "https://example.com/h", &["memo.read".to_string()]).is_err());
    }
}
