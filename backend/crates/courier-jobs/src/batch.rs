//! Bounded concurrent batch processing.
//!
//! Units are split into chunks of `chunk_size`; the units of one chunk run
//! concurrently and the next chunk starts once the whole chunk settled. Each
//! unit is guarded by its own lock so two runs (on this or another instance)
//! never work the same unit at once. A unit's failure, panic or lock
//! contention is recorded and the batch moves on.

use futures_util::future::join_all;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use courier_locks::{LockKey, LockManager, OwnerToken};

use crate::context::JobContext;
use crate::outcome::{RunStats, UnitOutcome, UnitReport};
use crate::work::{CompensationUnit, UnitHandler};

#[derive(Clone)]
pub struct BatchProcessor {
    locks: LockManager,
    chunk_size: usize,
    unit_lock_ttl: Duration,
    unit_lock_prefix: String,
}

impl BatchProcessor {
    pub fn new(
        locks: LockManager,
        chunk_size: usize,
        unit_lock_ttl: Duration,
        unit_lock_prefix: impl Into<String>,
    ) -> Self {
        Self {
            locks,
            chunk_size: chunk_size.max(1),
            unit_lock_ttl,
            unit_lock_prefix: unit_lock_prefix.into(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Process `units` and return the aggregated stats plus one report per
    /// attempted unit. Stops between chunks once the run is cancelled.
    pub async fn process(
        &self,
        ctx: &JobContext,
        units: &[CompensationUnit],
        handler: &Arc<dyn UnitHandler>,
    ) -> (RunStats, Vec<UnitReport>) {
        let mut totals = RunStats::default();
        let mut reports = Vec::with_capacity(units.len());

        for (index, chunk) in units.chunks(self.chunk_size).enumerate() {
            if ctx.is_cancelled() {
                ctx.log_warn(&format!(
                    "Cancelled before chunk {}; {} unit(s) left for a later run",
                    index + 1,
                    units.len() - totals.total
                ));
                break;
            }

            let outcomes =
                join_all(chunk.iter().map(|unit| self.process_unit(ctx, unit, handler))).await;

            let mut chunk_stats = RunStats {
                chunks: 1,
                ..Default::default()
            };
            for (unit, outcome) in chunk.iter().zip(outcomes) {
                chunk_stats.record(&outcome);
                reports.push(UnitReport {
                    unit_key: unit.unit_key.clone(),
                    outcome,
                });
            }
            totals.merge(&chunk_stats);

            ctx.log_info(&format!(
                "Chunk {} done: processed={} succeeded={} failed={} (lock_failed={}); running total: {}",
                index + 1,
                chunk_stats.processed,
                chunk_stats.succeeded,
                chunk_stats.failed,
                chunk_stats.lock_failed,
                totals
            ));
        }

        (totals, reports)
    }

    async fn process_unit(
        &self,
        ctx: &JobContext,
        unit: &CompensationUnit,
        handler: &Arc<dyn UnitHandler>,
    ) -> UnitOutcome {
        let key = match LockKey::with_prefix(&self.unit_lock_prefix, &unit.unit_key) {
            Ok(key) => key,
            Err(e) => return UnitOutcome::Failed { reason: e.to_string() },
        };
        let owner = OwnerToken::for_holder(&ctx.instance_id);

        match self.locks.acquire(&key, &owner, self.unit_lock_ttl).await {
            Ok(true) => {},
            Ok(false) => {
                ctx.log_info(&format!("Unit {} is locked elsewhere, skipping", unit.unit_key));
                return UnitOutcome::LockFailed;
            },
            Err(e) => {
                ctx.log_warn(&format!("Unit {} lock attempt failed: {}", unit.unit_key, e));
                return UnitOutcome::Failed {
                    reason: format!("lock store: {}", e),
                };
            },
        }

        let result = AssertUnwindSafe(handler.handle(ctx, unit)).catch_unwind().await;
        self.locks.release(&key, &owner).await;

        match result {
            Ok(Ok(processed_count)) => {
                ctx.log_debug(&format!(
                    "Unit {} handled ({} item(s))",
                    unit.unit_key, processed_count
                ));
                UnitOutcome::Succeeded { processed_count }
            },
            Ok(Err(e)) => {
                ctx.log_warn(&format!("Unit {} failed: {}", unit.unit_key, e));
                UnitOutcome::Failed { reason: e.to_string() }
            },
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(panic.as_ref()));
                ctx.log_warn(&format!("Unit {} failed: {}", unit.unit_key, reason));
                UnitOutcome::Failed { reason }
            },
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, Result};
    use async_trait::async_trait;
    use courier_locks::MemoryLockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PREFIX: &str = "msg_queue_compensation:topic";

    struct ScriptedHandler {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl UnitHandler for ScriptedHandler {
        async fn handle(&self, _ctx: &JobContext, unit: &CompensationUnit) -> Result<usize> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match unit.unit_key.as_str() {
                k if k.starts_with("fail") => Err(JobError::Handler("downstream refused".into())),
                k if k.starts_with("panic") => panic!("handler exploded on {}", k),
                _ => Ok(unit.pending_items),
            }
        }
    }

    fn unit(key: &str, pending: usize) -> CompensationUnit {
        CompensationUnit {
            unit_key: key.to_string(),
            discovered_at_ms: 0,
            pending_items: pending,
        }
    }

    fn setup(chunk_size: usize) -> (LockManager, BatchProcessor, Arc<ScriptedHandler>) {
        let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
        let processor =
            BatchProcessor::new(locks.clone(), chunk_size, Duration::from_secs(20), PREFIX);
        let handler = Arc::new(ScriptedHandler {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        (locks, processor, handler)
    }

    #[tokio::test]
    async fn test_mixed_outcomes_aggregate() {
        let (locks, processor, handler) = setup(2);
        let ctx = JobContext::new("compensation", "node-a");

        // Someone else is already working T-locked.
        let held = LockKey::with_prefix(PREFIX, "T-locked").unwrap();
        locks.acquire(&held, &OwnerToken::new(), Duration::from_secs(20)).await.unwrap();

        let units = vec![
            unit("T1", 3),
            unit("fail-1", 1),
            unit("T-locked", 2),
            unit("panic-1", 1),
            unit("T2", 5),
        ];
        let dyn_handler: Arc<dyn UnitHandler> = handler.clone();
        let (stats, reports) = processor.process(&ctx, &units, &dyn_handler).await;

        assert_eq!(stats.total, 5);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.lock_failed, 1);
        assert_eq!(stats.chunks, 3);
        assert!(stats.is_consistent());

        assert_eq!(reports[0].outcome, UnitOutcome::Succeeded { processed_count: 3 });
        assert_eq!(reports[2].outcome, UnitOutcome::LockFailed);
        match &reports[3].outcome {
            UnitOutcome::Failed { reason } => assert!(reason.contains("handler exploded")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unit_locks_released_after_failure_and_panic() {
        let (locks, processor, handler) = setup(4);
        let ctx = JobContext::new("compensation", "node-a");
        let units = vec![unit("fail-1", 1), unit("panic-1", 1), unit("T1", 1)];
        let dyn_handler: Arc<dyn UnitHandler> = handler;
        processor.process(&ctx, &units, &dyn_handler).await;

        for u in &units {
            let key = LockKey::with_prefix(PREFIX, &u.unit_key).unwrap();
            assert_eq!(locks.holder(&key).await.unwrap(), None, "{} still locked", u.unit_key);
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_chunk_size() {
        let (_locks, processor, handler) = setup(3);
        let ctx = JobContext::new("compensation", "node-a");
        let units: Vec<_> = (0..10).map(|i| unit(&format!("T{}", i), 1)).collect();
        let dyn_handler: Arc<dyn UnitHandler> = handler.clone();

        let (stats, _) = processor.process(&ctx, &units, &dyn_handler).await;

        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.succeeded, 10);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert!(handler.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_between_chunks() {
        let (_locks, processor, handler) = setup(2);
        let ctx = JobContext::new("compensation", "node-a");
        ctx.cancellation_token.cancel();
        let units = vec![unit("T1", 1), unit("T2", 1), unit("T3", 1)];
        let dyn_handler: Arc<dyn UnitHandler> = handler;

        let (stats, reports) = processor.process(&ctx, &units, &dyn_handler).await;
        assert_eq!(stats, RunStats::default());
        assert!(reports.is_empty());
    }
}
