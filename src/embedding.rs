//! AI provider abstraction: embeddings, chat, and vision.
//!
//! Defines the [`AiProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: reports itself disabled; used when no LLM is configured.
//! - **[`OpenAiProvider`]**: calls an OpenAI-compatible API (`/embeddings`,
//!   `/chat/completions`) with retry and backoff.
//!
//! Also provides vector utilities for the vector store:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//! - [`embed_cached`]: embedding lookup through the `embedding_cache` table
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::config::LlmConfig;

/// One chat turn in OpenAI wire format. `content` is a string or a parts array.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Value::String(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(text.into()),
        }
    }

    /// A user turn carrying text plus an inline image (`data:` URL).
    pub fn user_with_image(text: impl Into<String>, image_data_url: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: json!([
                { "type": "text", "text": text.into() },
                { "type": "image_url", "image_url": { "url": image_data_url.into() } }
            ]),
        }
    }
}

/// Embedding, chat, and vision backend.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// `false` for the disabled provider; callers check before calling.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Returns the embedding model identifier (e.g. `"text-embedding-3-small"`).
    fn embedding_model(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Run a chat completion and return the assistant's reply text.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Run a vision completion (used for OCR).
    async fn vision(&self, prompt: &str, image_data_url: &str) -> Result<String> {
        self.chat(&[ChatMessage::user_with_image(prompt, image_data_url)])
            .await
    }
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn AiProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A provider that reports itself disabled and fails every call.
pub struct DisabledProvider;

#[async_trait]
impl AiProvider for DisabledProvider {
    fn is_enabled(&self) -> bool {
        false
    }
    fn embedding_model(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("AI provider is disabled")
    }
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("AI provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Provider for OpenAI and OpenAI-compatible endpoints.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    ocr_model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if models, dims, or the API key are missing.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.embedding_model required for OpenAI provider"))?;
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.chat_model required for OpenAI provider"))?;
        let dims = config
            .embedding_dims
            .ok_or_else(|| anyhow::anyhow!("llm.embedding_dims required for OpenAI provider"))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("LLM_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            ocr_model: config.ocr_model.clone().unwrap_or_else(|| chat_model.clone()),
            chat_model,
            embedding_model,
            dims,
            max_retries: config.max_retries,
        })
    }

    /// POST `body` to `{base_url}{path}` with retry/backoff.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "LLM API transient error");
                        last_err = Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429), don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM request failed after retries")))
    }

    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({ "model": model, "messages": messages });
        let json = self.post_json("/chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.embedding_model, "input": texts });
        let json = self.post_json("/embeddings", &body).await?;
        parse_embeddings_response(&json)
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(&self.chat_model, messages).await
    }

    async fn vision(&self, prompt: &str, image_data_url: &str) -> Result<String> {
        self.complete(
            &self.ocr_model,
            &[ChatMessage::user_with_image(prompt, image_data_url)],
        )
        .await
    }
}

/// Parse an embeddings response, ordering vectors by their `index` field.
fn parse_embeddings_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_chat_response(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Create the provider named by `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn AiProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Embedding cache ============

/// Cache key: SHA-256 over model name and text.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Embed `text`, reusing a cached vector for the same model and text.
pub async fn embed_cached(
    pool: &SqlitePool,
    provider: &dyn AiProvider,
    text: &str,
) -> Result<Vec<f32>> {
    let model = provider.embedding_model();
    let key = cache_key(model, text);

    let cached: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT vector FROM embedding_cache WHERE content_hash = ?")
            .bind(&key)
            .fetch_optional(pool)
            .await?;
    if let Some(blob) = cached {
        return Ok(blob_to_vec(&blob));
    }

    let vector = embed_one(provider, text).await?;
    sqlx::query(
        r#"
        INSERT INTO embedding_cache (content_hash, model, dims, vector, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(content_hash) DO NOTHING
        "#,
    )
    .bind(&key)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(&vector))
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(vector)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use memohub::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.5, 0.5] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_embeddings_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_chat_response() {
        let json = json!({ "choices": [ { "message": { "role": "assistant", "content": " hi \n" } } ] });
        assert_eq!(parse_chat_response(&json).unwrap(), "hi");
        assert!(parse_chat_response(&json!({})).is_err());
    }

    #[test]
    fn test_cache_key_depends_on_model() {
        assert_ne!(cache_key("a", "text"), cache_key("b", "text"));
        assert_eq!(cache_key("a", "text").len(), 64);
    }

    #[test]
    fn test_image_message_shape() {
        let msg = ChatMessage::user_with_image("read this", "data:image/png;base64,AAAA");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let p = DisabledProvider;
        assert!(!p.is_enabled());
        assert!(p.embed(&["x".into()]).await.is_err());
    }
}
