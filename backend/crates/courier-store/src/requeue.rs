use async_trait::async_trait;
use std::time::Duration;

use courier_jobs::{CompensationUnit, JobContext, UnitHandler};

use crate::message_queue::SqliteMessageQueue;

/// Compensation handler that re-arms a topic's stuck messages so consumers
/// pick them up again. Consumers dedupe, so a message that was in fact
/// delivered is harmless.
pub struct RequeueHandler {
    queue: SqliteMessageQueue,
    stale_after: Duration,
}

impl RequeueHandler {
    pub fn new(queue: SqliteMessageQueue, stale_after: Duration) -> Self {
        Self { queue, stale_after }
    }
}

#[async_trait]
impl UnitHandler for RequeueHandler {
    async fn handle(&self, ctx: &JobContext, unit: &CompensationUnit) -> courier_jobs::Result<usize> {
        let moved = self.queue.requeue_stuck(&unit.unit_key, self.stale_after).await?;
        if moved != unit.pending_items {
            ctx.log_debug(&format!(
                "Topic {}: scanned {} stuck message(s), requeued {}",
                unit.unit_key, unit.pending_items, moved
            ));
        }
        Ok(moved)
    }
}
