//! Schedule table runner.
//!
//! Every enabled `[[schedule]]` entry gets its own background task ticking at
//! the entry's interval. A tick spawns one run of the registered job with a
//! fresh [`JobContext`]. Singleton entries skip ticks while their previous
//! run is still in flight. `stop` cancels the shared token, which wakes every
//! loop and any run waiting on it, then waits (bounded) for in-flight runs.
//!
//! ```rust,ignore
//! let runner = ScheduleRunner::new("node-a")
//!     .with_job(compensation)
//!     .with_entries(config.schedule.iter().map(ScheduleEntry::from).collect());
//! runner.start()?;
//! // ...
//! runner.stop(Duration::from_secs(30)).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use courier_configs::ScheduleSettings;

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::outcome::JobOutcome;
use crate::scheduled::ScheduledJob;

/// One row of the schedule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub job_id: String,
    pub interval: Duration,
    pub singleton: bool,
    pub enabled: bool,
}

impl ScheduleEntry {
    pub fn every(job_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            interval,
            singleton: true,
            enabled: true,
        }
    }

    pub fn overlapping(mut self) -> Self {
        self.singleton = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<&ScheduleSettings> for ScheduleEntry {
    fn from(settings: &ScheduleSettings) -> Self {
        Self {
            job_id: settings.job_id.clone(),
            interval: settings.interval(),
            singleton: settings.singleton,
            enabled: settings.enabled,
        }
    }
}

/// Scheduler state
enum SchedulerState {
    Stopped,
    Running {
        handles: Vec<JoinHandle<()>>,
        token: CancellationToken,
    },
}

pub struct ScheduleRunner {
    instance_id: String,
    jobs: HashMap<String, Arc<dyn ScheduledJob>>,
    entries: Vec<ScheduleEntry>,
    state: RwLock<SchedulerState>,
}

impl ScheduleRunner {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            jobs: HashMap::new(),
            entries: Vec::new(),
            state: RwLock::new(SchedulerState::Stopped),
        }
    }

    pub fn with_job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.insert(job.job_id().to_string(), job);
        self
    }

    pub fn with_entries(mut self, entries: Vec<ScheduleEntry>) -> Self {
        self.entries = entries;
        self
    }

    /// Spawn one loop per enabled entry. Returns how many were spawned.
    pub fn start(&self) -> Result<usize> {
        let mut state = self
            .state
            .write()
            .map_err(|e| JobError::Scheduler(format!("Failed to acquire write lock: {}", e)))?;

        if let SchedulerState::Running { .. } = &*state {
            return Err(JobError::Scheduler("Scheduler is already running".to_string()));
        }

        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for entry in &self.entries {
            if !entry.enabled {
                log::info!("Job {} is disabled in the schedule table, not scheduling", entry.job_id);
                continue;
            }
            let Some(job) = self.jobs.get(&entry.job_id) else {
                log::warn!("No job registered for schedule entry '{}', ignoring", entry.job_id);
                continue;
            };
            if entry.interval.is_zero() {
                log::warn!("Schedule entry '{}' has a zero interval, ignoring", entry.job_id);
                continue;
            }

            log::info!(
                "Scheduling {} every {:?}{}",
                entry.job_id,
                entry.interval,
                if entry.singleton { " (singleton)" } else { "" }
            );
            handles.push(tokio::spawn(job_loop(
                Arc::clone(job),
                entry.clone(),
                self.instance_id.clone(),
                token.clone(),
            )));
        }

        let count = handles.len();
        *state = SchedulerState::Running { handles, token };
        Ok(count)
    }

    /// Stop all loops and wait up to `grace` for in-flight runs; anything
    /// still running after that is aborted.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let previous = {
            let mut state = self
                .state
                .write()
                .map_err(|e| JobError::Scheduler(format!("Failed to acquire write lock: {}", e)))?;
            std::mem::replace(&mut *state, SchedulerState::Stopped)
        };

        let SchedulerState::Running { handles, token } = previous else {
            return Ok(());
        };

        token.cancel();

        let deadline = Instant::now() + grace;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => log::error!("Schedule loop ended abnormally: {}", e),
                Err(_) => {
                    log::warn!("Schedule loop did not stop within {:?}, aborting", grace);
                    handle.abort();
                },
            }
        }
        log::info!("Schedule runner stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state.read().as_deref(),
            Ok(SchedulerState::Running { .. })
        )
    }

    /// Run a registered job once, now, outside the schedule.
    pub async fn trigger(&self, job_id: &str) -> Option<JobOutcome> {
        let job = self.jobs.get(job_id)?;
        let ctx = JobContext::new(job_id, self.instance_id.clone());
        let outcome = job.run(&ctx).await;
        report(&ctx, &outcome);
        Some(outcome)
    }
}

/// Clears the in-flight flag however the run ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn job_loop(
    job: Arc<dyn ScheduledJob>,
    entry: ScheduleEntry,
    instance_id: String,
    token: CancellationToken,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut runs = JoinSet::new();
    let mut interval = tokio::time::interval_at(Instant::now() + entry.interval, entry.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                log_join_error(&entry.job_id, joined);
                continue;
            }
            _ = interval.tick() => {}
        }

        if entry.singleton && in_flight.load(Ordering::SeqCst) {
            log::debug!("[{}] Previous run still in flight, skipping tick", entry.job_id);
            continue;
        }

        in_flight.store(true, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&in_flight));
        let ctx = JobContext::with_cancellation(entry.job_id.clone(), instance_id.clone(), token.clone());
        let job = Arc::clone(&job);
        runs.spawn(async move {
            let _guard = guard;
            let outcome = job.run(&ctx).await;
            report(&ctx, &outcome);
        });
    }

    while let Some(joined) = runs.join_next().await {
        log_join_error(&entry.job_id, joined);
    }
    log::debug!("[{}] Schedule loop exited", entry.job_id);
}

fn report(ctx: &JobContext, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Skipped { reason } => ctx.log_debug(&format!("Run skipped: {}", reason)),
        JobOutcome::Succeeded(stats) if stats.total == 0 => ctx.log_debug("Run succeeded: nothing to do"),
        JobOutcome::Succeeded(stats) => ctx.log_info(&format!("Run succeeded: {}", stats)),
        JobOutcome::Failed { message } => ctx.log_error(&format!("Run failed: {}", message)),
    }
}

fn log_join_error(job_id: &str, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            log::error!("[{}] Run panicked: {}", job_id, e);
        } else {
            log::warn!("[{}] Run was cancelled: {}", job_id, e);
        }
    }
}
