use async_trait::async_trait;

use crate::context::JobContext;
use crate::outcome::JobOutcome;

/// A job the [`ScheduleRunner`](crate::ScheduleRunner) can invoke.
///
/// `run` never returns an error: contention and disabled switches come back
/// as [`JobOutcome::Skipped`], failures as [`JobOutcome::Failed`].
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn job_id(&self) -> &str;

    async fn run(&self, ctx: &JobContext) -> JobOutcome;
}
