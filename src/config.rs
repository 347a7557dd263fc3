//! Configuration loading and validation.
//!
//! Settings come from a TOML file (every section optional) and are then
//! overridden by environment variables. Everything is read once at boot.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:5230"
//!
//! [db]
//! relational_path = "./data/memohub.sqlite"
//! vector_path = "./data/memohub-vectors.sqlite"
//!
//! [storage]
//! backend = "local"          # local | s3 | oss
//!
//! [auth]
//! jwt_secret = "change-me-to-something-long"
//!
//! [llm]
//! provider = "openai"
//! chat_model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//! embedding_dims = 1536
//!
//! [backup]
//! enabled = true
//! max_count = 7
//! max_age_days = 30
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `MEMOHUB_BIND` | `server.bind` |
//! | `MEMOHUB_DB_PATH` | `db.relational_path` |
//! | `MEMOHUB_VECTOR_DB_PATH` | `db.vector_path` |
//! | `MEMOHUB_STORAGE_BACKEND` | `storage.backend` |
//! | `MEMOHUB_STORAGE_ROOT` | `storage.local_root` |
//! | `MEMOHUB_S3_BUCKET` / `MEMOHUB_S3_REGION` / `MEMOHUB_S3_ENDPOINT` | `storage.s3.*` |
//! | `MEMOHUB_JWT_SECRET` | `auth.jwt_secret` |
//! | `MEMOHUB_BA_TOKEN` / `MEMOHUB_BA_USER` | `auth.ba_token` / `auth.ba_user` |
//! | `MEMOHUB_ADMIN_USERS` (comma-separated) | `auth.admin_users` |
//! | `LLM_PROVIDER` / `LLM_BASE_URL` | `llm.provider` / `llm.base_url` |
//! | `LLM_API_KEY` (fallback `OPENAI_API_KEY`) | `llm.api_key` |
//! | `MEMOHUB_LANGUAGE` / `MEMOHUB_TIMEZONE` | `locale.*` |
//! | `MEMOHUB_BACKUP_ENABLED` / `MEMOHUB_BACKUP_MAX_COUNT` / `MEMOHUB_BACKUP_MAX_AGE_DAYS` | `backup.*` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5230".to_string()
}
fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_relational_path")]
    pub relational_path: PathBuf,
    #[serde(default = "default_vector_path")]
    pub vector_path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            relational_path: default_relational_path(),
            vector_path: default_vector_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_relational_path() -> PathBuf {
    PathBuf::from("./data/memohub.sqlite")
}
fn default_vector_path() -> PathBuf {
    PathBuf::from("./data/memohub-vectors.sqlite")
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
    /// Aliyun OSS, addressed through its S3-compatible API.
    Oss,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::S3 => "s3",
            StorageBackend::Oss => "oss",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            "oss" => Ok(StorageBackend::Oss),
            other => bail!("Unknown storage backend: '{}'. Must be local, s3, or oss.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
    #[serde(default)]
    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_root: default_local_root(),
            max_upload_bytes: default_max_upload(),
            s3: S3Config::default(),
        }
    }
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_max_upload() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint (MinIO, OSS, ...). Scheme defaults to https.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// `bucket.host/key` when true, `host/bucket/key` otherwise.
    #[serde(default = "default_true")]
    pub virtual_hosted: bool,
    /// Key prefix prepended to every object.
    #[serde(default)]
    pub prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            virtual_hosted: true,
            prefix: String::new(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_true")]
    pub allow_registration: bool,
    /// Static bearer token for server-to-server calls.
    #[serde(default)]
    pub ba_token: Option<String>,
    /// Username the BA token acts as.
    #[serde(default)]
    pub ba_user: Option<String>,
    /// Usernames allowed to run backup operations, besides `ba_user`.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl AuthConfig {
    pub fn is_admin(&self, username: &str) -> bool {
        self.ba_user.as_deref() == Some(username) || self.admin_users.iter().any(|u| u == username)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl(),
            bcrypt_cost: default_bcrypt_cost(),
            allow_registration: true,
            ba_token: None,
            ba_user: None,
            admin_users: Vec::new(),
        }
    }
}

fn default_token_ttl() -> i64 {
    24 * 7
}
fn default_bcrypt_cost() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Usually supplied through `LLM_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dims: Option<usize>,
    /// Vision-capable model used for OCR; falls back to `chat_model`.
    #[serde(default)]
    pub ocr_model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: None,
            chat_model: None,
            embedding_model: None,
            embedding_dims: None,
            ocr_model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocaleConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            timezone: default_timezone(),
        }
    }
}

fn default_language() -> String {
    "zh-CN".to_string()
}
fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_interval")]
    pub interval_hours: u64,
    #[serde(default = "default_backup_max_count")]
    pub max_count: usize,
    #[serde(default = "default_backup_max_age")]
    pub max_age_days: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_backup_interval(),
            max_count: default_backup_max_count(),
            max_age_days: default_backup_max_age(),
        }
    }
}

fn default_backup_interval() -> u64 {
    24
}
fn default_backup_max_count() -> usize {
    7
}
fn default_backup_max_age() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    /// Seconds between store optimisation passes; `0` disables them.
    #[serde(default = "default_optimize_interval")]
    pub optimize_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            optimize_interval_secs: default_optimize_interval(),
        }
    }
}

fn default_optimize_interval() -> u64 {
    6 * 3600
}

/// Load, override from the process environment, and validate.
///
/// A missing file is not an error: every setting has a default except
/// `auth.jwt_secret`, which may come from `MEMOHUB_JWT_SECRET`.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("MEMOHUB_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = lookup("MEMOHUB_DB_PATH") {
        config.db.relational_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("MEMOHUB_VECTOR_DB_PATH") {
        config.db.vector_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("MEMOHUB_STORAGE_BACKEND") {
        config.storage.backend = StorageBackend::parse(&v)?;
    }
    if let Some(v) = lookup("MEMOHUB_STORAGE_ROOT") {
        config.storage.local_root = PathBuf::from(v);
    }
    if let Some(v) = lookup("MEMOHUB_S3_BUCKET") {
        config.storage.s3.bucket = v;
    }
    if let Some(v) = lookup("MEMOHUB_S3_REGION") {
        config.storage.s3.region = v;
    }
    if let Some(v) = lookup("MEMOHUB_S3_ENDPOINT") {
        config.storage.s3.endpoint_url = Some(v);
    }
    if let Some(v) = lookup("MEMOHUB_JWT_SECRET") {
        config.auth.jwt_secret = v;
    }
    if let Some(v) = lookup("MEMOHUB_BA_TOKEN") {
        config.auth.ba_token = Some(v);
    }
    if let Some(v) = lookup("MEMOHUB_BA_USER") {
        config.auth.ba_user = Some(v);
    }
    if let Some(v) = lookup("MEMOHUB_ADMIN_USERS") {
        config.auth.admin_users = v
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = lookup("LLM_PROVIDER") {
        config.llm.provider = v;
    }
    if let Some(v) = lookup("LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Some(v) = lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        config.llm.api_key = Some(v);
    }
    if let Some(v) = lookup("MEMOHUB_LANGUAGE") {
        config.locale.language = v;
    }
    if let Some(v) = lookup("MEMOHUB_TIMEZONE") {
        config.locale.timezone = v;
    }
    if let Some(v) = lookup("MEMOHUB_BACKUP_ENABLED") {
        config.backup.enabled = matches!(v.as_str(), "1" | "true" | "yes");
    }
    if let Some(v) = lookup("MEMOHUB_BACKUP_MAX_COUNT") {
        config.backup.max_count = v
            .parse()
            .with_context(|| format!("MEMOHUB_BACKUP_MAX_COUNT is not a number: {}", v))?;
    }
    if let Some(v) = lookup("MEMOHUB_BACKUP_MAX_AGE_DAYS") {
        config.backup.max_age_days = v
            .parse()
            .with_context(|| format!("MEMOHUB_BACKUP_MAX_AGE_DAYS is not a number: {}", v))?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.auth.jwt_secret.len() < 16 {
        bail!("auth.jwt_secret must be set and at least 16 bytes (or set MEMOHUB_JWT_SECRET)");
    }
    if !(4..=31).contains(&config.auth.bcrypt_cost) {
        bail!("auth.bcrypt_cost must be in [4, 31]");
    }
    if config.auth.token_ttl_hours < 1 {
        bail!("auth.token_ttl_hours must be >= 1");
    }
    if config.auth.ba_token.is_some() != config.auth.ba_user.is_some() {
        bail!("auth.ba_token and auth.ba_user must be set together");
    }

    if config.db.max_connections == 0 {
        bail!("db.max_connections must be > 0");
    }

    match config.storage.backend {
        StorageBackend::Local => {}
        StorageBackend::S3 | StorageBackend::Oss => {
            if config.storage.s3.bucket.is_empty() {
                bail!(
                    "storage.s3.bucket must be set when backend is '{}'",
                    config.storage.backend.as_str()
                );
            }
            if config.storage.backend == StorageBackend::Oss
                && config.storage.s3.endpoint_url.is_none()
            {
                bail!("storage.s3.endpoint_url must be set for the oss backend");
            }
        }
    }

    if config.backup.max_count == 0 {
        bail!("backup.max_count must be >= 1");
    }
    if config.backup.max_age_days < 1 {
        bail!("backup.max_age_days must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.embedding_dims.is_none() || config.llm.embedding_dims == Some(0) {
                bail!("llm.embedding_dims must be > 0 when provider is 'openai'");
            }
            if config.llm.embedding_model.is_none() || config.llm.chat_model.is_none() {
                bail!("llm.embedding_model and llm.chat_model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
