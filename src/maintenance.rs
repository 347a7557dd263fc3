//! Background maintenance: store optimisation and scheduled backups.
//!
//! Both jobs run on tokio intervals. Each tick spawns a run, so a slow run
//! never delays the tick loop. A run that starts while the previous run of
//! the same job still holds its busy flag is skipped and logged; runs never
//! queue up behind each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::context::AppContext;
use crate::db::Stores;
use crate::response::ErrorCode;

/// Running background jobs.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the jobs enabled in the configuration.
    pub fn start(ctx: &AppContext) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::new();

        let optimize_secs = ctx.config.maintenance.optimize_interval_secs;
        if optimize_secs > 0 {
            let stores = ctx.stores.clone();
            handles.push(spawn_periodic(
                "optimize",
                Duration::from_secs(optimize_secs),
                rx.clone(),
                move || {
                    let stores = stores.clone();
                    async move { optimize(&stores).await }
                },
            ));
        }

        if ctx.config.backup.enabled {
            let backup = ctx.backup.clone();
            let hours = ctx.config.backup.interval_hours.max(1);
            handles.push(spawn_periodic(
                "backup",
                Duration::from_secs(hours * 3600),
                rx.clone(),
                move || {
                    let backup = backup.clone();
                    async move {
                        match backup.run().await {
                            Ok(_) => {}
                            Err(e) if e.code() == ErrorCode::BACKUP_IN_PROGRESS => {
                                tracing::info!("scheduled backup skipped, another backup is running");
                            }
                            // Already logged by the backup service.
                            Err(_) => {}
                        }
                        Ok(())
                    }
                },
            ));
        }

        tracing::info!(jobs = handles.len(), "maintenance scheduler started");
        Self { shutdown, handles }
    }

    /// Signal every job and wait for the current runs to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "maintenance job ended abnormally");
            }
        }
        tracing::info!("maintenance scheduler stopped");
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let busy = Arc::new(AtomicBool::new(false));
        let mut runs: Vec<JoinHandle<()>> = Vec::new();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing runs at boot.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tracing::debug!(job = name, "maintenance tick");
                    runs.retain(|run| !run.is_finished());
                    let busy = busy.clone();
                    let work = job();
                    runs.push(tokio::spawn(async move {
                        run_exclusive(name, &busy, work).await;
                    }));
                }
                _ = shutdown.changed() => break,
            }
        }

        for run in runs {
            if let Err(e) = run.await {
                tracing::warn!(job = name, error = %e, "maintenance run ended abnormally");
            }
        }
    })
}

/// Run `work` unless a previous run still holds `busy`.
///
/// Returns `false` when the run was skipped.
async fn run_exclusive<Fut>(name: &str, busy: &AtomicBool, work: Fut) -> bool
where
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    if busy
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        tracing::info!(job = name, "previous run still in progress, skipping");
        return false;
    }
    if let Err(e) = work.await {
        tracing::warn!(job = name, error = %e, "maintenance job failed");
    }
    busy.store(false, Ordering::Release);
    true
}

/// `PRAGMA optimize` and a WAL checkpoint on both stores.
pub async fn optimize(stores: &Stores) -> anyhow::Result<()> {
    for (name, pool) in [("relational", &stores.relational), ("vector", &stores.vectors)] {
        sqlx::query("PRAGMA optimize").execute(pool).await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(pool)
            .await?;
        tracing::debug!(store = name, "store optimised");
    }
    Ok(())
}
