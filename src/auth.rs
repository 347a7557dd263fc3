//! Users, sessions, and request authentication.
//!
//! Sessions are HS256 JSON Web Tokens signed with `auth.jwt_secret`. The
//! token is built directly from `hmac` + `sha2` + `base64`:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(HMAC-SHA256(secret, header.claims))
//! ```
//!
//! A request may also present the configured BA token
//! (`Authorization: Bearer <auth.ba_token>`), which acts as `auth.ba_user`.
//! This path is meant for server-to-server callers such as import scripts.
//!
//! [`AdminUser`] narrows [`AuthUser`] to `auth.ba_user` and `auth.admin_users`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{Row, SqlitePool};

use crate::context::AppContext;
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, User};
use crate::response::ErrorCode;

type HmacSha256 = Hmac<Sha256>;

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub token: String,
    #[serde(serialize_with = "crate::models::ts::iso")]
    pub expires_at: i64,
    pub user: User,
}

// ============ Tokens ============

fn sign(secret: &str, signing_input: &str) -> anyhow::Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {}", e))?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

pub fn issue_token(secret: &str, claims: &Claims) -> anyhow::Result<String> {
    let header = URL_SAFE_NO_PAD.encode(JWT_HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let signature = sign(secret, &signing_input)?.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Check signature and expiry at time `now`.
pub fn verify_token(secret: &str, token: &str, now: i64) -> AppResult<Claims> {
    let invalid = || AppError::business(ErrorCode::TOKEN_INVALID);

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let header_json: serde_json::Value = URL_SAFE_NO_PAD
        .decode(header)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(invalid)?;
    if header_json.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
        return Err(invalid());
    }

    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
    let mac = sign(secret, &format!("{}.{}", header, payload))?;
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let claims: Claims = URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(invalid)?;

    if claims.exp <= now {
        return Err(AppError::business(ErrorCode::TOKEN_EXPIRED));
    }
    Ok(claims)
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn session_for(ctx: &AppContext, user: User) -> AppResult<AuthPayload> {
    let now = now_ts();
    let expires_at = now + ctx.config.auth.token_ttl_hours * 3600;
    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        iat: now,
        exp: expires_at,
    };
    let token = issue_token(&ctx.config.auth.jwt_secret, &claims)?;
    Ok(AuthPayload {
        token,
        expires_at,
        user,
    })
}

// ============ Passwords ============

async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| anyhow::anyhow!("password hashing task failed: {}", e))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| anyhow::anyhow!("password verification task failed: {}", e))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password verification failed: {}", e)))
}

// ============ Users ============

fn validate_credentials(username: &str, password: &str) -> AppResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(AppError::Validation(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Validation(
            "username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    if password.chars().count() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    Ok(())
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        nickname: row.get("nickname"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login_at: row.get("last_login_at"),
    }
}

const USER_COLUMNS: &str = "id, username, nickname, created_at, updated_at, last_login_at";

pub async fn find_user(pool: &SqlitePool, id: &str) -> AppResult<User> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::business(ErrorCode::USER_NOT_FOUND))?;
    Ok(user_from_row(&row))
}

async fn find_user_by_name(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn register(ctx: &AppContext, req: RegisterRequest) -> AppResult<AuthPayload> {
    if !ctx.config.auth.allow_registration {
        return Err(AppError::business(ErrorCode::REGISTRATION_DISABLED));
    }
    let username = req.username.trim().to_string();
    validate_credentials(&username, &req.password)?;

    let pool = &ctx.stores.relational;
    if find_user_by_name(pool, &username).await?.is_some() {
        return Err(AppError::business(ErrorCode::USER_ALREADY_EXISTS));
    }

    let hash = hash_password(req.password, ctx.config.auth.bcrypt_cost).await?;
    let id = new_id();
    let now = now_ts();
    let nickname = req
        .nickname
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| username.clone());

    let inserted = sqlx::query(
        "INSERT INTO users (id, username, password_hash, nickname, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&username)
    .bind(&hash)
    .bind(&nickname)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::business(ErrorCode::USER_ALREADY_EXISTS));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user = %username, "user registered");
    session_for(ctx, find_user(pool, &id).await?)
}

pub async fn login(ctx: &AppContext, req: LoginRequest) -> AppResult<AuthPayload> {
    let pool = &ctx.stores.relational;
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE username = ?")
        .bind(req.username.trim())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::business(ErrorCode::USER_NOT_FOUND))?;

    let id: String = row.get("id");
    let hash: String = row.get("password_hash");
    if !verify_password(req.password, hash).await? {
        return Err(AppError::business(ErrorCode::PASSWORD_ERROR));
    }

    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(now_ts())
        .bind(&id)
        .execute(pool)
        .await?;

    session_for(ctx, find_user(pool, &id).await?)
}

/// Resolve an `Authorization` header value to a user.
pub async fn authenticate(ctx: &AppContext, header: &str) -> AppResult<AuthUser> {
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth("missing bearer token".into()))?;

    if let (Some(ba_token), Some(ba_user)) = (&ctx.config.auth.ba_token, &ctx.config.auth.ba_user)
    {
        if constant_time_eq(token.as_bytes(), ba_token.as_bytes()) {
            let user = find_user_by_name(&ctx.stores.relational, ba_user)
                .await?
                .ok_or_else(|| AppError::business(ErrorCode::USER_NOT_FOUND))?;
            return Ok(AuthUser {
                id: user.id,
                username: user.username,
            });
        }
    }

    let claims = verify_token(&ctx.config.auth.jwt_secret, token, now_ts())?;
    Ok(AuthUser {
        id: claims.sub,
        username: claims.username,
    })
}

impl FromRequestParts<AppContext> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Auth("missing bearer token".into()))?;
        authenticate(ctx, header).await
    }
}

/// An authenticated caller allowed to run maintenance operations.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<AppContext> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, ctx).await?;
        if !ctx.config.auth.is_admin(&user.username) {
            tracing::warn!(user = %user.username, path = %parts.uri.path(), "admin route refused");
            return Err(AppError::business(ErrorCode::FORBIDDEN));
        }
        Ok(AdminUser(user))
    }
}
