//! Database backups to object storage.
//!
//! A backup is a consistent `VACUUM INTO` snapshot of each store, uploaded
//! under `backups/<UTC stamp>/`:
//!
//! ```text
//! backups/20250101T030000Z/memohub.sqlite
//! backups/20250101T030000Z/memohub-vectors.sqlite
//! ```
//!
//! Only one backup runs at a time. Retention keeps at most
//! `backup.max_count` sets and drops any set older than `backup.max_age_days`.

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::BackupConfig;
use crate::db::Stores;
use crate::error::{AppError, AppResult};
use crate::models::{new_id, now_ts, ts};
use crate::response::ErrorCode;
use crate::storage::ObjectStorage;

const PREFIX: &str = "backups/";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const RELATIONAL_FILE: &str = "memohub.sqlite";
const VECTOR_FILE: &str = "memohub-vectors.sqlite";

/// One completed backup set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackupSet {
    pub stamp: String,
    pub files: Vec<String>,
    pub size: i64,
    #[serde(serialize_with = "ts::iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub enabled: bool,
    pub running: bool,
    pub storage: &'static str,
    pub max_count: usize,
    pub max_age_days: i64,
    pub last_backup: Option<BackupSet>,
    pub last_error: Option<String>,
    pub backups: Vec<BackupSet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub kept: usize,
}

#[derive(Default)]
struct LastRun {
    backup: Option<BackupSet>,
    error: Option<String>,
}

struct Inner {
    stores: Stores,
    storage: Arc<dyn ObjectStorage>,
    config: BackupConfig,
    running: AtomicBool,
    last: RwLock<LastRun>,
}

/// Backup runner shared by the HTTP handlers and the scheduler.
#[derive(Clone)]
pub struct BackupService {
    inner: Arc<Inner>,
}

/// Clears the running flag when the backup ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BackupService {
    pub fn new(stores: Stores, storage: Arc<dyn ObjectStorage>, config: BackupConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                storage,
                config,
                running: AtomicBool::new(false),
                last: RwLock::new(LastRun::default()),
            }),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Snapshot both stores, upload, then apply retention.
    pub async fn run(&self) -> AppResult<BackupSet> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::business(ErrorCode::BACKUP_IN_PROGRESS));
        }
        let _guard = RunningGuard(&self.inner.running);

        let result = self.snapshot_and_upload().await;
        let mut last = self.inner.last.write().await;
        match result {
            Ok(set) => {
                tracing::info!(stamp = %set.stamp, size = set.size, "backup complete");
                last.backup = Some(set.clone());
                last.error = None;
                drop(last);
                if let Err(e) = self.cleanup().await {
                    tracing::warn!(error = %e, "backup retention failed");
                }
                Ok(set)
            }
            Err(e) => {
                tracing::error!(error = %e, "backup failed");
                last.error = Some(e.to_string());
                Err(AppError::business_msg(ErrorCode::BACKUP_FAILED, e.to_string()))
            }
        }
    }

    async fn snapshot_and_upload(&self) -> anyhow::Result<BackupSet> {
        let now = Utc::now();
        let stamp = now.format(STAMP_FORMAT).to_string();
        let work_dir = std::env::temp_dir().join(format!("memohub-backup-{}", new_id()));
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = async {
            let mut files = Vec::new();
            let mut size = 0i64;
            for (pool, name) in [
                (&self.inner.stores.relational, RELATIONAL_FILE),
                (&self.inner.stores.vectors, VECTOR_FILE),
            ] {
                let path = work_dir.join(name);
                snapshot(pool, &path).await?;
                let bytes = tokio::fs::read(&path).await?;
                size += bytes.len() as i64;

                let key = format!("{}{}/{}", PREFIX, stamp, name);
                self.inner
                    .storage
                    .put(&key, bytes, "application/vnd.sqlite3")
                    .await?;
                files.push(key);
            }
            Ok::<_, anyhow::Error>(BackupSet {
                stamp: stamp.clone(),
                files,
                size,
                created_at: now.timestamp(),
            })
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            tracing::warn!(dir = %work_dir.display(), error = %e, "failed to remove backup work dir");
        }
        result
    }

    /// Backup sets currently in storage, newest first.
    pub async fn list(&self) -> anyhow::Result<Vec<BackupSet>> {
        let objects = self.inner.storage.list(PREFIX).await?;
        let mut sets: BTreeMap<String, BackupSet> = BTreeMap::new();
        for obj in objects {
            let Some((stamp, _file)) = obj
                .key
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.split_once('/'))
            else {
                continue;
            };
            let created_at = parse_stamp(stamp).unwrap_or(obj.last_modified);
            let set = sets.entry(stamp.to_string()).or_insert_with(|| BackupSet {
                stamp: stamp.to_string(),
                files: Vec::new(),
                size: 0,
                created_at,
            });
            set.size += obj.size;
            set.files.push(obj.key.clone());
        }
        let mut sets: Vec<BackupSet> = sets.into_values().collect();
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.stamp.cmp(&a.stamp)));
        Ok(sets)
    }

    pub async fn status(&self) -> AppResult<BackupStatus> {
        let backups = self
            .list()
            .await
            .map_err(|e| AppError::business_msg(ErrorCode::STORAGE_ERROR, e.to_string()))?;
        let last = self.inner.last.read().await;
        Ok(BackupStatus {
            enabled: self.inner.config.enabled,
            running: self.is_running(),
            storage: self.inner.storage.backend(),
            max_count: self.inner.config.max_count,
            max_age_days: self.inner.config.max_age_days,
            last_backup: last.backup.clone().or_else(|| backups.first().cloned()),
            last_error: last.error.clone(),
            backups,
        })
    }

    /// Delete backup sets outside the retention policy.
    pub async fn cleanup(&self) -> AppResult<CleanupReport> {
        let sets = self
            .list()
            .await
            .map_err(|e| AppError::business_msg(ErrorCode::STORAGE_ERROR, e.to_string()))?;
        let expired = select_expired(
            &sets,
            self.inner.config.max_count,
            self.inner.config.max_age_days,
            now_ts(),
        );

        for set in sets.iter().filter(|s| expired.contains(&s.stamp)) {
            for key in &set.files {
                self.inner
                    .storage
                    .delete(key)
                    .await
                    .map_err(|e| AppError::business_msg(ErrorCode::STORAGE_ERROR, e.to_string()))?;
            }
            tracing::info!(stamp = %set.stamp, "backup removed by retention");
        }

        Ok(CleanupReport {
            kept: sets.len() - expired.len(),
            deleted: expired,
        })
    }
}

/// `VACUUM INTO` a fresh file at `path`.
async fn snapshot(pool: &SqlitePool, path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        tokio::fs::remove_file(path).await?;
    }
    sqlx::query("VACUUM INTO ?")
        .bind(path.to_string_lossy().to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn parse_stamp(stamp: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Stamps to delete: everything past the newest `max_count`, and anything
/// older than `max_age_days`. `sets` may be in any order.
pub fn select_expired(sets: &[BackupSet], max_count: usize, max_age_days: i64, now: i64) -> Vec<String> {
    let mut ordered: Vec<&BackupSet> = sets.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.stamp.cmp(&a.stamp)));
    let cutoff = now - max_age_days * 86_400;

    ordered
        .iter()
        .enumerate()
        .filter(|(i, set)| *i >= max_count || set.created_at < cutoff)
        .map(|(_, set)| set.stamp.clone())
        .collect()
}
