//! Long-running scheduler process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keepup_config::KeepUpConfig;
use keepup_probe::{Collaborators, NetworkTaskWorker, ProbeSettings};
use keepup_scheduler::{Scheduler, SuspensionScheduler, TokioTriggers, Trigger};
use keepup_storage::SqliteStore;

use crate::config_watcher;

/// How often tasks started by other `keepup` invocations are picked up.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Open the task database configured in `config`.
pub fn open_store(config: &KeepUpConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.database_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?
        .with_log_limit(config.log.limit);
    Ok(Arc::new(store))
}

/// Wire a scheduler from `config`. Returns it with the receiver of fired triggers.
pub fn build_scheduler(
    config: &KeepUpConfig,
    store: Arc<SqliteStore>,
) -> (Scheduler, tokio::sync::mpsc::UnboundedReceiver<Trigger>) {
    let worker = NetworkTaskWorker::new(
        store.clone(),
        Collaborators::system(config),
        ProbeSettings::from(config),
    );
    let (triggers, receiver) = TokioTriggers::new();
    let suspension = Arc::new(SuspensionScheduler::new(
        config.suspension.active_intervals(),
    ));
    let scheduler = Scheduler::new(
        store,
        worker,
        Arc::new(triggers),
        suspension,
        config.worker.max_concurrent_probes,
    );
    (scheduler, receiver)
}

/// Recover running tasks and probe until Ctrl-C.
///
/// Shutdown terminates every task, keeping its running intent for the next start.
pub async fn run(config: KeepUpConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let (scheduler, receiver) = build_scheduler(&config, store);
    let scheduler = Arc::new(scheduler);

    let armed = scheduler.startup().await?;
    info!("Recovered {armed} running tasks");

    let watcher_handle = config_watcher::start_config_watcher(scheduler.suspension().clone());
    if watcher_handle.is_some() {
        info!("  Config watcher: active");
    }

    let shutdown = CancellationToken::new();
    let run_loop = tokio::spawn(scheduler.clone().run(receiver, shutdown.clone()));

    let reconcile_scheduler = scheduler.clone();
    let reconcile_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = reconcile_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = reconcile_scheduler.reconcile().await {
                        warn!("Reconcile failed: {e}");
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();
    let terminated = scheduler.terminate_all().await?;
    info!("Terminated {terminated} tasks");
    if let Err(e) = run_loop.await {
        warn!("Scheduler loop ended abnormally: {e}");
    }
    Ok(())
}
