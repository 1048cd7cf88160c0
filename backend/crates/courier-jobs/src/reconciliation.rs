//! Task status reconciliation.
//!
//! Re-derives the status of long-running records from the external source of
//! truth. Lookups are made one at a time with a fixed pause in between so a
//! large backlog never floods the external service.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use courier_configs::{JobSwitches, ReconciliationSettings, RECONCILIATION_JOB_ID};
use courier_locks::LockManager;

use crate::context::JobContext;
use crate::error::Result;
use crate::exclusive::{run_exclusive, GlobalLock};
use crate::outcome::{JobOutcome, RunStats, UnitOutcome};
use crate::scheduled::ScheduledJob;
use crate::work::{ExternalStatusSource, StatusRecord, StatusRepository};

pub struct ReconciliationJob {
    switches: Arc<dyn JobSwitches>,
    global: GlobalLock,
    in_progress_status: String,
    stale_after: Duration,
    batch_limit: usize,
    throttle: Duration,
    repository: Arc<dyn StatusRepository>,
    external: Arc<dyn ExternalStatusSource>,
}

impl ReconciliationJob {
    pub fn new(
        settings: &ReconciliationSettings,
        locks: LockManager,
        switches: Arc<dyn JobSwitches>,
        repository: Arc<dyn StatusRepository>,
        external: Arc<dyn ExternalStatusSource>,
    ) -> Self {
        Self {
            switches,
            global: GlobalLock {
                locks,
                key: settings.global_lock_key.clone(),
                ttl: settings.global_lock_ttl(),
            },
            in_progress_status: settings.in_progress_status.clone(),
            stale_after: settings.stale_after(),
            batch_limit: settings.batch_limit,
            throttle: settings.throttle(),
            repository,
            external,
        }
    }

    async fn reconcile(&self, ctx: &JobContext) -> Result<RunStats> {
        let records = self
            .repository
            .find_stale(&self.in_progress_status, self.stale_after, self.batch_limit)
            .await?;
        if records.is_empty() {
            ctx.log_debug("No stale records found");
            return Ok(RunStats::default());
        }
        ctx.log_info(&format!(
            "Reconciling {} record(s) stuck in '{}' for over {}s",
            records.len(),
            self.in_progress_status,
            self.stale_after.as_secs()
        ));

        let mut stats = RunStats::default();
        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.throttle) => {},
                    _ = ctx.cancelled() => {},
                }
            }
            if ctx.is_cancelled() {
                ctx.log_warn(&format!(
                    "Cancelled; {} record(s) left for a later run",
                    records.len() - index
                ));
                break;
            }

            let (outcome, changed) = self.reconcile_one(ctx, record).await;
            stats.record(&outcome);
            if changed {
                stats.updated += 1;
            }
        }

        ctx.log_info(&format!("Reconciliation finished in {}ms: {}", ctx.elapsed_ms(), stats));
        Ok(stats)
    }

    async fn reconcile_one(&self, ctx: &JobContext, record: &StatusRecord) -> (UnitOutcome, bool) {
        let external = match self.external.fetch_status(&record.record_id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                ctx.log_warn(&format!("Record {} unknown to status source", record.record_id));
                return (
                    UnitOutcome::Failed {
                        reason: "unknown to status source".to_string(),
                    },
                    false,
                );
            },
            Err(e) => {
                ctx.log_warn(&format!("Status lookup for {} failed: {}", record.record_id, e));
                return (UnitOutcome::Failed { reason: e.to_string() }, false);
            },
        };

        if external == record.status {
            return (UnitOutcome::Succeeded { processed_count: 0 }, false);
        }

        match self.repository.update_status(record, &external).await {
            Ok(true) => {
                ctx.log_info(&format!(
                    "Record {}: '{}' -> '{}'",
                    record.record_id, record.status, external
                ));
                (UnitOutcome::Succeeded { processed_count: 1 }, true)
            },
            Ok(false) => {
                ctx.log_info(&format!(
                    "Record {} changed locally during lookup; keeping the local status",
                    record.record_id
                ));
                (UnitOutcome::Succeeded { processed_count: 0 }, false)
            },
            Err(e) => {
                ctx.log_warn(&format!("Updating {} failed: {}", record.record_id, e));
                (UnitOutcome::Failed { reason: e.to_string() }, false)
            },
        }
    }
}

#[async_trait]
impl ScheduledJob for ReconciliationJob {
    fn job_id(&self) -> &str {
        RECONCILIATION_JOB_ID
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        run_exclusive(ctx, &self.switches, &self.global, self.reconcile(ctx)).await
    }
}
