//! Object storage for attachments and backups.
//!
//! Two implementations of [`ObjectStorage`]:
//!
//! - **[`LocalStorage`]**: files under a root directory.
//! - **[`S3Storage`]**: any S3-compatible service (AWS, MinIO, Aliyun OSS),
//!   using hand-rolled SigV4 signing over `reqwest`.
//!
//! Keys are `/`-separated relative paths such as `attachments/<user>/<id>` or
//! `backups/20250101T000000Z/memohub.sqlite`.
//!
//! # Credentials
//!
//! The S3 backend reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! optionally `AWS_SESSION_TOKEN`. The OSS backend first tries
//! `OSS_ACCESS_KEY_ID` / `OSS_ACCESS_KEY_SECRET`, then the AWS names.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{S3Config, StorageBackend, StorageConfig};

type HmacSha256 = Hmac<Sha256>;

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: i64,
    /// Unix seconds.
    pub last_modified: i64,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Backend name for logs and system info.
    fn backend(&self) -> &'static str;

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;
}

/// Build the configured backend.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStorage::new(config.local_root.clone()))),
        StorageBackend::S3 | StorageBackend::Oss => {
            let creds = Credentials::from_env(config.backend)?;
            Ok(Arc::new(S3Storage::new(
                config.s3.clone(),
                creds,
                config.backend,
            )?))
        }
    }
}

/// Guess a MIME type from a filename extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "sqlite" | "db" => "application/vnd.sqlite3",
        _ => "application/octet-stream",
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        bail!("Invalid object key: '{}'", key);
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        bail!("Invalid object key: '{}'", key);
    }
    Ok(())
}

// ============ Local ============

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let path = self.root.join(key);
        debug_assert!(path.components().all(|c| c != Component::ParentDir));
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        if !self.root.exists() {
            return Ok(objects);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = relative_key(&self.root, &path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                let last_modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                objects.push(StoredObject {
                    key,
                    size: meta.len() as i64,
                    last_modified,
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

// ============ S3 / OSS ============

struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    fn from_env(backend: StorageBackend) -> Result<Self> {
        if backend == StorageBackend::Oss {
            if let (Ok(id), Ok(secret)) = (
                std::env::var("OSS_ACCESS_KEY_ID"),
                std::env::var("OSS_ACCESS_KEY_SECRET"),
            ) {
                return Ok(Self {
                    access_key_id: id,
                    secret_access_key: secret,
                    session_token: None,
                });
            }
        }

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Storage {
    client: reqwest::Client,
    config: S3Config,
    creds: Credentials,
    scheme: String,
    /// Host without bucket.
    base_host: String,
    backend: StorageBackend,
}

impl S3Storage {
    fn new(config: S3Config, creds: Credentials, backend: StorageBackend) -> Result<Self> {
        let (scheme, base_host) = match &config.endpoint_url {
            Some(url) => split_endpoint(url),
            None => (
                "https".to_string(),
                format!("s3.{}.amazonaws.com", config.region),
            ),
        };
        if base_host.is_empty() {
            bail!("storage.s3.endpoint_url has no host");
        }

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            creds,
            scheme,
            base_host,
            backend,
        })
    }

    fn host(&self) -> String {
        if self.config.virtual_hosted {
            format!("{}.{}", self.config.bucket, self.base_host)
        } else {
            self.base_host.clone()
        }
    }

    fn full_key(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    }

    fn canonical_uri(&self, full_key: &str) -> String {
        let encoded = full_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        if self.config.virtual_hosted {
            format!("/{}", encoded)
        } else {
            format!("/{}/{}", self.config.bucket, encoded)
        }
    }

    /// Sign and send one request. `query` need not be sorted.
    async fn send(
        &self,
        method: reqwest::Method,
        full_key: &str,
        mut query: Vec<(String, String)>,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let host = self.host();
        let canonical_uri = self.canonical_uri(full_key);

        query.sort();
        let canonical_querystring: String = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        req.send()
            .await
            .with_context(|| format!("S3 request to {} failed", url))
    }
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    bail!(
        "S3 {} failed (HTTP {}): {}",
        what,
        status,
        body.chars().take(500).collect::<String>()
    )
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn backend(&self) -> &'static str {
        self.backend.as_str()
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        validate_key(key)?;
        let resp = self
            .send(
                reqwest::Method::PUT,
                &self.full_key(key),
                Vec::new(),
                data,
                Some(content_type),
            )
            .await?;
        check_status(resp, "PutObject").await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let resp = self
            .send(reqwest::Method::GET, &self.full_key(key), Vec::new(), Vec::new(), None)
            .await?;
        let resp = check_status(resp, "GetObject").await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let resp = self
            .send(reqwest::Method::DELETE, &self.full_key(key), Vec::new(), Vec::new(), None)
            .await?;
        // S3 answers 204 for missing keys too.
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        check_status(resp, "DeleteObject").await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let full_prefix = self.full_key(prefix);
        let strip = self.full_key("");
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !full_prefix.is_empty() {
                query.push(("prefix".to_string(), full_prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .send(reqwest::Method::GET, "", query, Vec::new(), None)
                .await?;
            let resp = check_status(resp, "ListObjectsV2").await?;
            let xml = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml);

            objects.extend(batch.into_iter().map(|mut obj| {
                if let Some(rest) = obj.key.strip_prefix(&strip) {
                    obj.key = rest.to_string();
                }
                obj
            }));

            if is_truncated && next_token.is_some() {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

/// Split `https://host:port/...` into scheme and host. No scheme means https.
fn split_endpoint(url: &str) -> (String, String) {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("https".to_string(), url),
    };
    let host = rest.split('/').next().unwrap_or_default().to_string();
    (scheme, host)
}

// ============ SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Parse a `ListObjectsV2` body: objects, truncation flag, continuation token.
fn parse_list_objects_response(xml: &str) -> (Vec<StoredObject>, bool, Option<String>) {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }
        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        objects.push(StoredObject {
            key,
            size,
            last_modified,
        });
    }

    (objects, is_truncated, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derive_signing_key() {
        // AWS SigV4 documentation example
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world"), "hello%20world");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
        assert_eq!(uri_encode("safe-_.~"), "safe-_.~");
    }

    #[test]
    fn test_parse_list_response() {
        let xml = r#"<ListBucketResult>
            <IsTruncated>true</IsTruncated>
            <NextContinuationToken>abc</NextContinuationToken>
            <Contents><Key>backups/a/</Key><Size>0</Size></Contents>
            <Contents><Key>backups/a/memohub.sqlite</Key><Size>42</Size>
              <LastModified>2024-01-15T10:30:00.000Z</LastModified></Contents>
        </ListBucketResult>"#;
        let (objects, truncated, token) = parse_list_objects_response(xml);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("abc"));
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size, 42);
        assert_eq!(objects[0].last_modified, 1_705_314_600);
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(
            split_endpoint("http://localhost:9000"),
            ("http".to_string(), "localhost:9000".to_string())
        );
        assert_eq!(
            split_endpoint("oss-cn-hangzhou.aliyuncs.com"),
            ("https".to_string(), "oss-cn-hangzhou.aliyuncs.com".to_string())
        );
    }

    #[test]
    fn test_path_style_uri() {
        let storage = S3Storage::new(
            S3Config {
                bucket: "notes".into(),
                endpoint_url: Some("http://localhost:9000".into()),
                virtual_hosted: false,
                prefix: "memohub/".into(),
                ..S3Config::default()
            },
            Credentials {
                access_key_id: "a".into(),
                secret_access_key: "b".into(),
                session_token: None,
            },
            StorageBackend::S3,
        )
        .unwrap();
        assert_eq!(storage.host(), "localhost:9000");
        let key = storage.full_key("attachments/u 1/x.png");
        assert_eq!(key, "memohub/attachments/u 1/x.png");
        assert_eq!(
            storage.canonical_uri(&key),
            "/notes/memohub/attachments/u%201/x.png"
        );
    }

    #[test]
    fn test_rejects_traversal_keys() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("attachments/u/1").is_ok());
    }

    #[tokio::test]
    async fn test_local_roundtrip_and_list() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().to_path_buf());

        storage
            .put("backups/b/two", b"22".to_vec(), "text/plain")
            .await
            .unwrap();
        storage
            .put("backups/a/one", b"1".to_vec(), "text/plain")
            .await
            .unwrap();
        storage
            .put("attachments/x", b"x".to_vec(), "text/plain")
            .await
            .unwrap();

        assert_eq!(storage.get("backups/b/two").await.unwrap(), b"22");

        let listed = storage.list("backups/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["backups/a/one", "backups/b/two"]);
        assert_eq!(listed[1].size, 2);

        storage.delete("backups/a/one").await.unwrap();
        storage.delete("backups/a/one").await.unwrap();
        assert_eq!(storage.list("backups/").await.unwrap().len(), 1);
        assert!(storage.get("backups/a/one").await.is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("scan.PNG"), "image/png");
        assert_eq!(content_type_for("notes.md"), "text/markdown");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
