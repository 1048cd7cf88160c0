//! Seams to the outside world: where work comes from and who executes it.

use async_trait::async_trait;
use std::time::Duration;

use crate::context::JobContext;
use crate::error::Result;

/// One discovered piece of stale work, e.g. a topic with stuck messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationUnit {
    /// Identity used for the per-unit lock (topic id).
    pub unit_key: String,
    pub discovered_at_ms: i64,
    /// Stale items under this unit at scan time.
    pub pending_items: usize,
}

/// Scans for units whose work has been pending longer than a threshold.
///
/// Implementations must answer from an indexed predicate
/// (status in set AND age); this runs every few seconds.
#[async_trait]
pub trait CompensationSource: Send + Sync {
    async fn scan_stale(&self, older_than: Duration, limit: usize) -> Result<Vec<CompensationUnit>>;
}

/// Business handler for one unit. Returns how many items it processed.
#[async_trait]
pub trait UnitHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext, unit: &CompensationUnit) -> Result<usize>;
}

/// A locally mirrored status whose truth lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub record_id: String,
    pub status: String,
    pub updated_at_ms: i64,
}

#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Records still in `status` and not touched for `older_than`.
    async fn find_stale(
        &self,
        status: &str,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<StatusRecord>>;

    /// Compare-and-set: write `status` only while the stored record still
    /// carries `current.status` and `current.updated_at_ms`. Returns `false`
    /// when the record vanished or was changed since it was read.
    async fn update_status(&self, current: &StatusRecord, status: &str) -> Result<bool>;
}

/// Authoritative status lookup (e.g. the sandbox that ran the task).
#[async_trait]
pub trait ExternalStatusSource: Send + Sync {
    /// `Ok(None)` when the source does not know the record.
    async fn fetch_status(&self, record_id: &str) -> Result<Option<String>>;
}
