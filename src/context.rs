//! Application context shared by every handler and background task.
//!
//! Built once at boot by [`AppContext::init`] and cloned by handle into the
//! router state. Nothing in the crate reaches for global state; services take
//! the context (or the piece they need) as an argument.

use anyhow::{Context as _, Result};
use std::sync::Arc;

use crate::backup::BackupService;
use crate::config::Config;
use crate::db::Stores;
use crate::embedding::{create_provider, AiProvider};
use crate::migrate::{run_migrations, MigrationReport};
use crate::models::now_ts;
use crate::push::PushDispatcher;
use crate::storage::{create_storage, ObjectStorage};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub storage: Arc<dyn ObjectStorage>,
    pub ai: Arc<dyn AiProvider>,
    pub push: PushDispatcher,
    pub backup: BackupService,
    /// Unix seconds.
    pub started_at: i64,
    /// Outcome of the boot-time migration run.
    pub migrations: Arc<MigrationReport>,
}

impl AppContext {
    /// Connect both stores, migrate them, and build the service handles.
    ///
    /// A table that fails to migrate is reported in [`AppContext::migrations`]
    /// and does not stop boot.
    pub async fn init(config: Config) -> Result<Self> {
        let stores = Stores::connect(&config)
            .await
            .context("Failed to open databases")?;
        let report = run_migrations(&stores.relational, &stores.vectors).await?;

        let storage = create_storage(&config.storage)?;
        let ai: Arc<dyn AiProvider> = Arc::from(create_provider(&config.llm)?);
        let push = PushDispatcher::new(stores.relational.clone());
        let backup = BackupService::new(stores.clone(), storage.clone(), config.backup.clone());

        tracing::info!(
            storage = storage.backend(),
            ai_enabled = ai.is_enabled(),
            "application context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            stores,
            storage,
            ai,
            push,
            backup,
            started_at: now_ts(),
            migrations: Arc::new(report),
        })
    }

    /// Replace the AI provider (tests inject a deterministic one).
    pub fn with_ai_provider(mut self, ai: Arc<dyn AiProvider>) -> Self {
        self.ai = ai;
        self
    }

    pub async fn shutdown(&self) {
        self.stores.close().await;
        tracing::info!("stores closed");
    }
}
