//! Single-runner-across-instances wrapper shared by the scheduled jobs.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use courier_configs::JobSwitches;
use courier_locks::{LockKey, LockManager, OwnerToken};

use crate::batch::panic_message;
use crate::context::JobContext;
use crate::error::Result;
use crate::outcome::{JobOutcome, RunStats};

/// Global lock settings of one job.
#[derive(Clone)]
pub struct GlobalLock {
    pub locks: LockManager,
    pub key: String,
    pub ttl: Duration,
}

/// Run `work` only if the job is switched on and this caller wins the
/// global lock. The lock is released on every exit path, panics included.
pub async fn run_exclusive<F>(
    ctx: &JobContext,
    switches: &Arc<dyn JobSwitches>,
    global: &GlobalLock,
    work: F,
) -> JobOutcome
where
    F: Future<Output = Result<RunStats>>,
{
    if !switches.is_enabled(&ctx.job_id) {
        ctx.log_debug("Disabled by configuration, nothing to do");
        return JobOutcome::skipped("disabled");
    }

    let key = match LockKey::parse(&global.key) {
        Ok(key) => key,
        Err(e) => {
            ctx.log_error(&format!("Invalid global lock key: {}", e));
            return JobOutcome::failed(e.to_string());
        },
    };
    let owner = OwnerToken::for_holder(&ctx.instance_id);

    match global.locks.acquire(&key, &owner, global.ttl).await {
        Ok(true) => {},
        Ok(false) => {
            ctx.log_info(&format!("Global lock {} held by another runner, skipping run", key));
            return JobOutcome::skipped("global lock held");
        },
        Err(e) => {
            ctx.log_error(&format!("Could not reach lock store for {}: {}", key, e));
            return JobOutcome::failed(format!("lock store: {}", e));
        },
    }

    let result = AssertUnwindSafe(work).catch_unwind().await;
    global.locks.release(&key, &owner).await;

    match result {
        Ok(Ok(stats)) => JobOutcome::Succeeded(stats),
        Ok(Err(e)) => {
            ctx.log_error(&format!("Run failed after {}ms: {}", ctx.elapsed_ms(), e));
            JobOutcome::failed(e.to_string())
        },
        Err(panic) => {
            let message = format!("run panicked: {}", panic_message(panic.as_ref()));
            ctx.log_error(&message);
            JobOutcome::failed(message)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use courier_configs::{ServerConfig, COMPENSATION_JOB_ID};
    use courier_locks::MemoryLockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn global(locks: &LockManager) -> GlobalLock {
        GlobalLock {
            locks: locks.clone(),
            key: "msg_queue_compensation:global:run".into(),
            ttl: Duration::from_secs(900),
        }
    }

    fn switches(enabled: bool) -> Arc<dyn JobSwitches> {
        let mut config = ServerConfig::default();
        config.compensation.enabled = enabled;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_disabled_job_takes_no_lock() {
        let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
        let ctx = JobContext::new(COMPENSATION_JOB_ID, "node-a");
        let calls = AtomicUsize::new(0);

        let outcome = run_exclusive(&ctx, &switches(false), &global(&locks), async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(RunStats::default())
        })
        .await;

        assert_eq!(outcome, JobOutcome::skipped("disabled"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let key = LockKey::parse("msg_queue_compensation:global:run").unwrap();
        assert_eq!(locks.holder(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_released_after_error_and_panic() {
        let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
        let key = LockKey::parse("msg_queue_compensation:global:run").unwrap();
        let ctx = JobContext::new(COMPENSATION_JOB_ID, "node-a");

        let failed = run_exclusive(&ctx, &switches(true), &global(&locks), async {
            Err(JobError::Source("scan timed out".into()))
        })
        .await;
        assert!(matches!(failed, JobOutcome::Failed { .. }));
        assert_eq!(locks.holder(&key).await.unwrap(), None);

        let panicked = run_exclusive(&ctx, &switches(true), &global(&locks), async {
            let stats: Result<RunStats> = Err(JobError::Source("unreachable".into()));
            if stats.is_err() {
                panic!("scan exploded");
            }
            stats
        })
        .await;
        match panicked {
            JobOutcome::Failed { message } => assert!(message.contains("scan exploded")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(locks.holder(&key).await.unwrap(), None);
    }
}
