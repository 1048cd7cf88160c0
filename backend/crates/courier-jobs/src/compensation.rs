//! Stuck-message compensation.
//!
//! Each run: check the per-run switch, try the global lock once (skip if
//! another instance holds it), scan for stale units, fan them out through the
//! [`BatchProcessor`], release the global lock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use courier_configs::{CompensationSettings, JobSwitches, COMPENSATION_JOB_ID};
use courier_locks::LockManager;

use crate::batch::BatchProcessor;
use crate::context::JobContext;
use crate::error::Result;
use crate::exclusive::{run_exclusive, GlobalLock};
use crate::outcome::{JobOutcome, RunStats};
use crate::scheduled::ScheduledJob;
use crate::work::{CompensationSource, UnitHandler};

pub struct CompensationJob {
    job_id: String,
    switches: Arc<dyn JobSwitches>,
    global: GlobalLock,
    stale_after: Duration,
    batch_limit: usize,
    source: Arc<dyn CompensationSource>,
    handler: Arc<dyn UnitHandler>,
    batch: BatchProcessor,
}

impl CompensationJob {
    pub fn new(
        settings: &CompensationSettings,
        locks: LockManager,
        switches: Arc<dyn JobSwitches>,
        source: Arc<dyn CompensationSource>,
        handler: Arc<dyn UnitHandler>,
    ) -> Self {
        let batch = BatchProcessor::new(
            locks.clone(),
            settings.chunk_size,
            settings.unit_lock_ttl(),
            settings.unit_lock_prefix.clone(),
        );
        Self {
            job_id: COMPENSATION_JOB_ID.to_string(),
            switches,
            global: GlobalLock {
                locks,
                key: settings.global_lock_key.clone(),
                ttl: settings.global_lock_ttl(),
            },
            stale_after: settings.stale_after(),
            batch_limit: settings.batch_limit,
            source,
            handler,
            batch,
        }
    }

    /// Register under a different job id (e.g. a second queue).
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    async fn compensate(&self, ctx: &JobContext) -> Result<RunStats> {
        let units = self.source.scan_stale(self.stale_after, self.batch_limit).await?;
        if units.is_empty() {
            ctx.log_debug("No stale units found");
            return Ok(RunStats::default());
        }

        ctx.log_info(&format!(
            "Found {} stale unit(s) older than {}s (limit {}), chunk size {}",
            units.len(),
            self.stale_after.as_secs(),
            self.batch_limit,
            self.batch.chunk_size()
        ));

        let (stats, _reports) = self.batch.process(ctx, &units, &self.handler).await;
        ctx.log_info(&format!("Compensation finished in {}ms: {}", ctx.elapsed_ms(), stats));
        Ok(stats)
    }
}

#[async_trait]
impl ScheduledJob for CompensationJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        run_exclusive(ctx, &self.switches, &self.global, self.compensate(ctx)).await
    }
}
