use serde::Serialize;
use std::fmt;

/// Result of one scheduled invocation.
///
/// Contention and a disabled switch are `Skipped`, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Skipped { reason: String },
    Succeeded(RunStats),
    Failed { message: String },
}

impl JobOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        JobOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobOutcome::Failed {
            message: message.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }

    pub fn stats(&self) -> Option<&RunStats> {
        match self {
            JobOutcome::Succeeded(stats) => Some(stats),
            _ => None,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            JobOutcome::Succeeded(stats) => write!(f, "succeeded ({})", stats),
            JobOutcome::Failed { message } => write!(f, "failed ({})", message),
        }
    }
}

/// Result of one compensation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded { processed_count: usize },
    /// Another worker holds the unit's lock; picked up again by a later scan.
    LockFailed,
    Failed { reason: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit_key: String,
    pub outcome: UnitOutcome,
}

/// Per-run counters. `succeeded + failed == processed == total` once a run
/// has finished; lock failures are a subset of `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub lock_failed: usize,
    pub chunks: usize,
    /// Records whose stored status was overwritten (reconciliation).
    pub updated: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: &UnitOutcome) {
        self.total += 1;
        self.processed += 1;
        match outcome {
            UnitOutcome::Succeeded { .. } => self.succeeded += 1,
            UnitOutcome::LockFailed => {
                self.failed += 1;
                self.lock_failed += 1;
            },
            UnitOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.total += other.total;
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.lock_failed += other.lock_failed;
        self.chunks += other.chunks;
        self.updated += other.updated;
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed == self.processed && self.processed == self.total
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} processed={} succeeded={} failed={} lock_failed={} chunks={}",
            self.total, self.processed, self.succeeded, self.failed, self.lock_failed, self.chunks
        )?;
        if self.updated > 0 {
            write!(f, " updated={}", self.updated)?;
        }
        Ok(())
    }
}
