//! Server lifecycle orchestration.
//!
//! `bootstrap` opens the stores, builds the lock manager and the jobs, and
//! assembles the schedule runner from the `[[schedule]]` table. `run` starts
//! the runner and coordinates graceful shutdown on Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use courier_configs::{JobSwitches, LockBackend, LockSettings, ServerConfig};
use courier_jobs::{CompensationJob, ReconciliationJob, ScheduleEntry, ScheduleRunner};
use courier_locks::{LockManager, LockStore, MemoryLockStore, SqliteLockStore};
use courier_store::{HttpStatusSource, RequeueHandler, SqliteMessageQueue, SqliteStore, SqliteTaskRuns};
use log::{debug, info, warn};

/// Everything the running server owns.
pub struct ApplicationComponents {
    pub runner: ScheduleRunner,
}

pub fn build_lock_manager(settings: &LockSettings) -> anyhow::Result<LockManager> {
    let store: Arc<dyn LockStore> = match settings.backend {
        LockBackend::Memory => {
            warn!("Using in-memory locks; only safe with a single server instance");
            Arc::new(MemoryLockStore::new())
        },
        LockBackend::Sqlite => {
            info!("Using SQLite locks at {}", settings.sqlite_path);
            Arc::new(SqliteLockStore::open(&settings.sqlite_path)?)
        },
    };
    Ok(LockManager::new(store).with_spin_interval(Duration::from_millis(settings.spin_interval_ms)))
}

/// Build stores, jobs and the schedule runner. Nothing is started yet.
pub async fn bootstrap(
    config: &ServerConfig,
    switches: Arc<dyn JobSwitches>,
) -> anyhow::Result<ApplicationComponents> {
    let locks = build_lock_manager(&config.locks)?;

    let store = SqliteStore::open(&config.store.sqlite_path)?;
    info!("Work store opened at {}", config.store.sqlite_path);

    let queue = SqliteMessageQueue::new(store.clone());
    let compensation = CompensationJob::new(
        &config.compensation,
        locks.clone(),
        Arc::clone(&switches),
        Arc::new(queue.clone()),
        Arc::new(RequeueHandler::new(queue, config.compensation.stale_after())),
    );
    debug!(
        "Compensation: stale after {}s, batch {}, chunk {}, unit lock ttl {}s",
        config.compensation.stale_after_secs,
        config.compensation.batch_limit,
        config.compensation.chunk_size,
        config.compensation.unit_lock_ttl_secs
    );

    let reconciliation = ReconciliationJob::new(
        &config.reconciliation,
        locks,
        switches,
        Arc::new(SqliteTaskRuns::new(store)),
        Arc::new(HttpStatusSource::from_settings(&config.store)?),
    );
    debug!(
        "Reconciliation: stale after {}s, batch {}, throttle {}ms, sandbox {}",
        config.reconciliation.stale_after_secs,
        config.reconciliation.batch_limit,
        config.reconciliation.throttle_ms,
        config.store.sandbox_base_url
    );

    let runner = ScheduleRunner::new(config.server.instance_id.clone())
        .with_job(Arc::new(compensation))
        .with_job(Arc::new(reconciliation))
        .with_entries(config.schedule.iter().map(ScheduleEntry::from).collect());

    Ok(ApplicationComponents { runner })
}

/// Start the schedule runner and block until Ctrl+C, then stop it gracefully.
pub async fn run(config: &ServerConfig, components: ApplicationComponents) -> anyhow::Result<()> {
    let scheduled = components.runner.start()?;
    info!(
        "Courier server '{}' running with {} scheduled job(s)",
        config.server.instance_id, scheduled
    );

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating graceful shutdown...");

    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    components.runner.stop(grace).await?;

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_configs::{LiveConfig, COMPENSATION_JOB_ID};
    use courier_jobs::JobOutcome;

    fn config_in(dir: &std::path::Path) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.locks.backend = LockBackend::Sqlite;
        config.locks.sqlite_path = dir.join("locks.db").display().to_string();
        config.store.sqlite_path = dir.join("data").join("courier.db").display().to_string();
        config
    }

    #[tokio::test]
    async fn test_bootstrap_wires_both_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let switches: Arc<dyn JobSwitches> = Arc::new(config.clone());

        let components = bootstrap(&config, switches).await.unwrap();
        let outcome = components.runner.trigger(COMPENSATION_JOB_ID).await;
        assert!(matches!(outcome, Some(JobOutcome::Succeeded(_))));

        assert_eq!(components.runner.start().unwrap(), 2);
        components.runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_switch_skips_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.compensation.enabled = false;
        let live: Arc<dyn JobSwitches> = Arc::new(LiveConfig::fixed(config.clone()));

        let components = bootstrap(&config, live).await.unwrap();
        let outcome = components.runner.trigger(COMPENSATION_JOB_ID).await;
        assert_eq!(outcome, Some(JobOutcome::skipped("disabled")));
    }
}
