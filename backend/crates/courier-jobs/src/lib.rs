//! # courier-jobs
//!
//! Periodic repair jobs that keep message delivery and task state honest when
//! consumers crash or instances race each other.
//!
//! ## Architecture
//!
//! ```text
//! ScheduleRunner ──tick──▶ ScheduledJob::run(JobContext)
//!                              │
//!                              ├─ JobSwitches::is_enabled   (per-run, live)
//!                              ├─ global lock, try once     (skip if held)
//!                              ├─ CompensationJob:  scan ─▶ BatchProcessor ─▶ UnitHandler
//!                              │                           (chunks, per-unit lock)
//!                              └─ ReconciliationJob: stale records ─▶ ExternalStatusSource
//!                                                           (throttled, one at a time)
//! ```
//!
//! Runs return a tagged [`JobOutcome`]; nothing in this crate uses errors to
//! signal "someone else is already doing it".

pub mod batch;
pub mod compensation;
pub mod context;
pub mod error;
pub mod exclusive;
pub mod outcome;
pub mod reconciliation;
pub mod scheduled;
pub mod scheduler;
pub mod work;

pub use batch::BatchProcessor;
pub use compensation::CompensationJob;
pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use exclusive::{run_exclusive, GlobalLock};
pub use outcome::{JobOutcome, RunStats, UnitOutcome, UnitReport};
pub use reconciliation::ReconciliationJob;
pub use scheduled::ScheduledJob;
pub use scheduler::{ScheduleEntry, ScheduleRunner};
pub use work::{
    CompensationSource, CompensationUnit, ExternalStatusSource, StatusRecord, StatusRepository,
    UnitHandler,
};
