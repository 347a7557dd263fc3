//! End-to-end tests for the HTTP API.
//!
//! Each test builds the full router over fresh SQLite files and local
//! storage in a temp dir, then drives it with `oneshot` requests. AI calls go
//! to a deterministic keyword embedder so similarity ranking is predictable.
//! Embeddings are written in the background, so tests that rank memos wait
//! for them first.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use memohub::config::Config;
use memohub::context::AppContext;
use memohub::embedding::{AiProvider, ChatMessage};
use memohub::server::build_router;

const KEYWORDS: [&str; 4] = ["rust", "cooking", "travel", "music"];

/// One dimension per keyword, plus a small constant so no vector is zero.
struct KeywordAi;

#[async_trait]
impl AiProvider for KeywordAi {
    fn embedding_model(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let last = messages
            .last()
            .and_then(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(format!("echo: {}", last))
    }

    async fn vision(&self, _prompt: &str, image_data_url: &str) -> Result<String> {
        let header = image_data_url.split(',').next().unwrap_or_default();
        Ok(format!("text from {}", header))
    }
}

/// Answers every call after `DELAY`, well past the test request timeout.
struct SlowAi;

impl SlowAi {
    const DELAY: Duration = Duration::from_secs(3);
}

#[async_trait]
impl AiProvider for SlowAi {
    fn embedding_model(&self) -> &str {
        "slow-test"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Self::DELAY).await;
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        tokio::time::sleep(Self::DELAY).await;
        Ok("late".to_string())
    }
}

const ADMIN: &str = "root";

struct TestApp {
    _tmp: TempDir,
    router: Router,
}

async fn setup() -> TestApp {
    setup_with(Arc::new(KeywordAi), |_| {}).await
}

async fn setup_with(ai: Arc<dyn AiProvider>, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.db.relational_path = tmp.path().join("data/memohub.sqlite");
    config.db.vector_path = tmp.path().join("data/memohub-vectors.sqlite");
    config.storage.local_root = tmp.path().join("files");
    config.auth.jwt_secret = "test-secret-0123456789abcdef".to_string();
    config.auth.bcrypt_cost = 4;
    config.auth.admin_users = vec![ADMIN.to_string()];
    tweak(&mut config);

    let ctx = AppContext::init(config)
        .await
        .unwrap()
        .with_ai_provider(ai);
    assert!(ctx.migrations.is_complete());

    TestApp {
        _tmp: tmp,
        router: build_router(ctx),
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(&self, username: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({ "username": username, "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0, "register failed: {}", body);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    async fn create_memo(&self, token: &str, content: &str) -> Value {
        let (_, body) = self
            .call(
                Method::POST,
                "/api/v1/memos",
                Some(token),
                Some(json!({ "content": content })),
            )
            .await;
        assert_eq!(body["code"], 0, "create memo failed: {}", body);
        body["data"].clone()
    }

    async fn wait_for_embedding(&self, token: &str, memo: &Value) {
        let uri = format!("/api/v1/memos/{}", memo["id"].as_str().unwrap());
        for _ in 0..100 {
            let (_, body) = self.call(Method::GET, &uri, Some(token), None).await;
            if body["data"]["has_embedding"] == true {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("memo was never embedded: {}", memo);
    }

    async fn tag_names(&self, token: &str) -> Vec<String> {
        let (_, body) = self.call(Method::GET, "/api/v1/tags", Some(token), None).await;
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str().map(String::from))
            .collect()
    }
}

fn strings(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect()
}

#[tokio::test]
async fn test_health_envelope() {
    let app = setup().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_register_login_me() {
    let app = setup().await;
    app.register("alice").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "secret123" })),
        )
        .await;
    assert_eq!(body["code"], 0);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (_, body) = app.call(Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["username"], "alice");
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_duplicate_registration() {
    let app = setup().await;
    app.register("bob").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "username": "bob", "password": "another1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 1001);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_login_failures() {
    let app = setup().await;
    app.register("carol").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "secret123" })),
        )
        .await;
    assert_eq!(body["code"], 1000);

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "carol", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(body["code"], 1002);
}

#[tokio::test]
async fn test_missing_and_bad_tokens() {
    let app = setup().await;

    let (status, body) = app.call(Method::GET, "/api/v1/memos", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 401);

    let (_, body) = app
        .call(Method::GET, "/api/v1/memos", Some("not.a.jwt"), None)
        .await;
    assert_eq!(body["code"], 1003);
}

#[tokio::test]
async fn test_unknown_route_is_404_envelope() {
    let app = setup().await;
    let (status, body) = app.call(Method::GET, "/api/v1/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert!(body["msg"].is_string());
}

#[tokio::test]
async fn test_malformed_body_is_params_error() {
    let app = setup().await;
    let token = app.register("dave").await;

    // Missing `content`.
    let (status, body) = app
        .call(Method::POST, "/api/v1/memos", Some(&token), Some(json!({ "tags": [] })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 400);

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/memos",
            Some(&token),
            Some(json!({ "content": "   " })),
        )
        .await;
    assert_eq!(body["code"], 2001);
}

#[tokio::test]
async fn test_memo_tags_are_counted() {
    let app = setup().await;
    let token = app.register("erin").await;

    let memo = app.create_memo(&token, "Reading the #rust book #learning").await;
    let tags: Vec<&str> = memo["tags"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(tags.contains(&"rust"));
    assert!(tags.contains(&"learning"));
    app.create_memo(&token, "More #rust").await;

    let (_, body) = app.call(Method::GET, "/api/v1/tags", Some(&token), None).await;
    let rust = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "rust")
        .cloned()
        .unwrap();
    assert_eq!(rust["usage_count"], 2);

    let id = memo["id"].as_str().unwrap();
    let (_, body) = app
        .call(Method::DELETE, &format!("/api/v1/memos/{}", id), Some(&token), None)
        .await;
    assert_eq!(body["code"], 0);

    let (_, body) = app.call(Method::GET, "/api/v1/tags", Some(&token), None).await;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["rust"]);

    let (_, body) = app
        .call(Method::GET, &format!("/api/v1/memos/{}", id), Some(&token), None)
        .await;
    assert_eq!(body["code"], 2000);
}

#[tokio::test]
async fn test_memos_are_private_per_user() {
    let app = setup().await;
    let owner = app.register("frank").await;
    let other = app.register("grace").await;

    let memo = app.create_memo(&owner, "private thoughts").await;
    let id = memo["id"].as_str().unwrap();

    let (_, body) = app
        .call(Method::GET, &format!("/api/v1/memos/{}", id), Some(&other), None)
        .await;
    assert_eq!(body["code"], 2000);

    let (_, body) = app.call(Method::GET, "/api/v1/memos", Some(&other), None).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_category_name_conflict() {
    let app = setup().await;
    let token = app.register("heidi").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/categories",
            Some(&token),
            Some(json!({ "name": "Work" })),
        )
        .await;
    assert_eq!(body["code"], 0);

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/categories",
            Some(&token),
            Some(json!({ "name": "Work" })),
        )
        .await;
    assert_eq!(body["code"], 4001);
}

#[tokio::test]
async fn test_related_and_semantic_search() {
    let app = setup().await;
    let token = app.register("ivan").await;

    let anchor = app.create_memo(&token, "rust rust ownership notes").await;
    let near = app.create_memo(&token, "rust async runtime").await;
    let far = app.create_memo(&token, "cooking pasta for dinner").await;
    for memo in [&anchor, &near, &far] {
        app.wait_for_embedding(&token, memo).await;
    }

    let id = anchor["id"].as_str().unwrap();
    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/memos/{}/related?limit=1", id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    let related = body["data"].as_array().unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0]["memo"]["id"], near["id"]);

    let (_, body) = app
        .call(
            Method::GET,
            "/api/v1/memos/search/semantic?q=cooking",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(body["code"], 0);
    let hits = body["data"].as_array().unwrap();
    assert!(hits[0]["memo"]["content"]
        .as_str()
        .unwrap()
        .contains("pasta"));
}

#[tokio::test]
async fn test_conversation_round_trip() {
    let app = setup().await;
    let token = app.register("judy").await;

    let (_, body) = app
        .call(Method::POST, "/api/v1/ai/conversations", Some(&token), Some(json!({})))
        .await;
    assert_eq!(body["code"], 0);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = app
        .call(
            Method::POST,
            &format!("/api/v1/ai/conversations/{}/messages", id),
            Some(&token),
            Some(json!({ "content": "what did I write about travel?" })),
        )
        .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["answer"]["content"], "echo: what did I write about travel?");

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/ai/conversations/{}", id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["title"], "what did I write about travel?");
}

#[tokio::test]
async fn test_attachment_upload_and_download() {
    let app = setup().await;
    let token = app.register("ken").await;

    // "hello world"
    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/attachments",
            Some(&token),
            Some(json!({ "filename": "hello.txt", "data": "aGVsbG8gd29ybGQ=" })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["size"], 11);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/api/v1/attachments/{}/content", id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello world");
}

#[tokio::test]
async fn test_backup_force_and_status() {
    let app = setup().await;
    let token = app.register(ADMIN).await;
    app.create_memo(&token, "something worth keeping").await;

    let (_, body) = app
        .call(Method::POST, "/api/v1/backup/force", Some(&token), None)
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["files"].as_array().unwrap().len(), 2);

    let (_, body) = app
        .call(Method::GET, "/api/v1/backup/status", Some(&token), None)
        .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["running"], false);
    assert_eq!(body["data"]["backups"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_system_info_reports_migrations() {
    let app = setup().await;
    let token = app.register("mia").await;
    let (_, body) = app
        .call(Method::GET, "/api/v1/system/info", Some(&token), None)
        .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["migrations_complete"], true);
    assert_eq!(body["data"]["storage_backend"], "local");
}

#[tokio::test]
async fn test_unsupported_method_is_405_envelope() {
    let app = setup().await;
    let (status, body) = app.call(Method::PATCH, "/api/v1/memos", None, None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], 405);
    assert!(body["msg"].is_string());
}

#[tokio::test]
async fn test_undecodable_path_is_params_error() {
    let app = setup().await;
    let token = app.register("nina").await;
    let (status, body) = app
        .call(Method::GET, "/api/v1/memos/%FF%FE", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_huge_page_is_params_error() {
    let app = setup().await;
    let token = app.register("oscar").await;
    let (status, body) = app
        .call(
            Method::GET,
            "/api/v1/memos?page=9223372036854775807&page_size=100",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_slow_ai_does_not_block_writes() {
    let app = setup_with(Arc::new(SlowAi), |config| {
        config.server.request_timeout_secs = 1;
    })
    .await;
    let token = app.register("pat").await;

    // Embedding runs after the response.
    let memo = app.create_memo(&token, "written while the model is slow").await;
    assert_eq!(memo["has_embedding"], false);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/v1/memos/{}/annotate", memo["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["code"], 408);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_update_memo_rederives_tags_and_resets_ai() {
    let app = setup().await;
    let token = app.register("quinn").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/memos",
            Some(&token),
            Some(json!({ "content": "trip notes #travel #music", "tags": ["keep"] })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(strings(&body["data"]["tags"]), vec!["keep", "travel", "music"]);
    let uri = format!("/api/v1/memos/{}", body["data"]["id"].as_str().unwrap());

    let (_, body) = app
        .call(Method::POST, &format!("{}/annotate", uri), Some(&token), None)
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["ai_summary"], "echo: trip notes #travel #music");

    // Content unchanged: derived data stays.
    let (_, body) = app
        .call(Method::PUT, &uri, Some(&token), Some(json!({ "is_pinned": true })))
        .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["is_pinned"], true);
    assert_eq!(body["data"]["ai_summary"], "echo: trip notes #travel #music");

    let (_, body) = app
        .call(
            Method::PUT,
            &uri,
            Some(&token),
            Some(json!({ "content": "trip notes #rust" })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(strings(&body["data"]["tags"]), vec!["keep", "rust"]);
    assert!(body["data"]["ai_summary"].is_null());
    app.wait_for_embedding(&token, &body["data"]).await;

    let mut names = app.tag_names(&token).await;
    names.sort();
    assert_eq!(names, vec!["keep", "rust"]);
}

#[tokio::test]
async fn test_tag_rename_and_delete() {
    let app = setup().await;
    let token = app.register("rosa").await;
    let first = app.create_memo(&token, "one #alpha").await;
    let second = app.create_memo(&token, "two #beta").await;

    let (_, body) = app.call(Method::GET, "/api/v1/tags", Some(&token), None).await;
    let id_of = |name: &str| {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == name)
            .and_then(|t| t["id"].as_str())
            .unwrap()
            .to_string()
    };
    let (alpha, beta) = (id_of("alpha"), id_of("beta"));

    let (_, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/tags/{}", alpha),
            Some(&token),
            Some(json!({ "name": "beta" })),
        )
        .await;
    assert_eq!(body["code"], 3001);

    let (_, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/tags/{}", alpha),
            Some(&token),
            Some(json!({ "name": "#gamma", "color": "#ff0000" })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["name"], "gamma");
    assert_eq!(body["data"]["color"], "#ff0000");

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/memos/{}", first["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(strings(&body["data"]["tags"]), vec!["gamma"]);

    let (_, body) = app
        .call(Method::DELETE, &format!("/api/v1/tags/{}", beta), Some(&token), None)
        .await;
    assert_eq!(body["code"], 0);

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/memos/{}", second["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    assert!(strings(&body["data"]["tags"]).is_empty());
    assert_eq!(app.tag_names(&token).await, vec!["gamma"]);

    let (_, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/tags/{}", beta),
            Some(&token),
            Some(json!({ "name": "delta" })),
        )
        .await;
    assert_eq!(body["code"], 3000);
}

#[tokio::test]
async fn test_public_memo_visibility() {
    let app = setup().await;
    let token = app.register("sam").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/memos",
            Some(&token),
            Some(json!({ "content": "shared recipe", "is_public": true })),
        )
        .await;
    assert_eq!(body["code"], 0);
    let shared = body["data"]["id"].as_str().unwrap().to_string();
    let private = app.create_memo(&token, "diary").await;

    let (_, body) = app
        .call(Method::GET, &format!("/api/v1/public/memos/{}", shared), None, None)
        .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["content"], "shared recipe");

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/public/memos/{}", private["id"].as_str().unwrap()),
            None,
            None,
        )
        .await;
    assert_eq!(body["code"], 2000);
}

#[tokio::test]
async fn test_ocr_on_attachment_and_inline_image() {
    let app = setup().await;
    let token = app.register("tess").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/attachments",
            Some(&token),
            Some(json!({ "filename": "scan.png", "content_type": "image/png", "data": "iVBORw0KGgo=" })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = app
        .call(Method::POST, "/api/v1/ocr", Some(&token), Some(json!({ "attachment_id": id })))
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["text"], "text from data:image/png;base64");
    assert_eq!(body["data"]["attachment_id"], id.as_str());

    let (_, body) = app
        .call(Method::GET, &format!("/api/v1/attachments/{}", id), Some(&token), None)
        .await;
    assert_eq!(body["data"]["ocr_text"], "text from data:image/png;base64");

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/ocr",
            Some(&token),
            Some(json!({ "image": "data:image/jpeg;base64,/9j/4AAQ" })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["text"], "text from data:image/jpeg;base64");
    assert!(body["data"].get("attachment_id").is_none());

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/ocr",
            Some(&token),
            Some(json!({ "image": "aGVsbG8=", "content_type": "text/plain" })),
        )
        .await;
    assert_eq!(body["code"], 400);

    let (_, body) = app
        .call(Method::POST, "/api/v1/ocr", Some(&token), Some(json!({})))
        .await;
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_push_rule_crud_and_deliveries() {
    let app = setup().await;
    let token = app.register("uma").await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/push-rules",
            Some(&token),
            Some(json!({ "name": "hook", "webhook_url": "http://127.0.0.1:9/hook", "events": [] })),
        )
        .await;
    assert_eq!(body["code"], 400);

    // Nothing listens on the discard port.
    let (_, body) = app
        .call(
            Method::POST,
            "/api/v1/push-rules",
            Some(&token),
            Some(json!({
                "name": "hook",
                "webhook_url": "http://127.0.0.1:9/hook",
                "events": ["memo.created"],
                "secret": "s3cret"
            })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["has_secret"], true);
    assert!(body["data"].get("secret").is_none());
    let uri = format!("/api/v1/push-rules/{}", body["data"]["id"].as_str().unwrap());

    let (_, body) = app
        .call(
            Method::PUT,
            &uri,
            Some(&token),
            Some(json!({ "events": ["*"], "enabled": false })),
        )
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(strings(&body["data"]["events"]), vec!["*"]);
    assert_eq!(body["data"]["enabled"], false);

    let (_, body) = app.call(Method::GET, "/api/v1/push-rules", Some(&token), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = app
        .call(Method::POST, &format!("{}/test", uri), Some(&token), None)
        .await;
    assert_eq!(body["code"], 5001);

    let (_, body) = app
        .call(Method::GET, &format!("{}/deliveries", uri), Some(&token), None)
        .await;
    assert_eq!(body["code"], 0);
    let deliveries = body["data"].as_array().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0]["event"], "push.test");
    assert_eq!(deliveries[0]["success"], false);

    let (_, body) = app.call(Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(body["code"], 0);
    let (_, body) = app.call(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(body["code"], 5000);
}

#[tokio::test]
async fn test_backup_routes_require_admin() {
    let app = setup().await;
    let token = app.register("victor").await;

    for (method, uri) in [
        (Method::GET, "/api/v1/backup/status"),
        (Method::POST, "/api/v1/backup/force"),
        (Method::POST, "/api/v1/backup/cleanup"),
    ] {
        let (status, body) = app.call(method, uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 403, "{} was not refused", uri);
    }
}

#[tokio::test]
async fn test_backup_retention_and_cleanup() {
    let app = setup_with(Arc::new(KeywordAi), |config| {
        config.backup.max_count = 1;
    })
    .await;
    let token = app.register(ADMIN).await;

    let (_, first) = app
        .call(Method::POST, "/api/v1/backup/force", Some(&token), None)
        .await;
    assert_eq!(first["code"], 0, "{}", first);
    // Backup stamps have one-second resolution.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let (_, second) = app
        .call(Method::POST, "/api/v1/backup/force", Some(&token), None)
        .await;
    assert_eq!(second["code"], 0, "{}", second);

    let (_, body) = app
        .call(Method::GET, "/api/v1/backup/status", Some(&token), None)
        .await;
    let backups = body["data"]["backups"].as_array().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["stamp"], second["data"]["stamp"]);

    let (_, body) = app
        .call(Method::POST, "/api/v1/backup/cleanup", Some(&token), None)
        .await;
    assert_eq!(body["code"], 0, "{}", body);
    assert_eq!(body["data"]["kept"], 1);
    assert!(body["data"]["deleted"].as_array().unwrap().is_empty());
}
