//! Topic message table as a compensation source.
//!
//! A message is stuck when it sits in `pending` or `processing` longer than
//! the threshold (its consumer crashed or the queue dropped it). Stuck
//! messages are grouped per topic: one topic is one compensation unit.

use async_trait::async_trait;
use rusqlite::params;
use std::time::Duration;

use courier_jobs::{CompensationSource, CompensationUnit};

use crate::error::Result;
use crate::sqlite::{cutoff_ms, now_ms, sql_err, SqliteStore};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_DELIVERED: &str = "delivered";

#[derive(Clone)]
pub struct SqliteMessageQueue {
    store: SqliteStore,
}

impl SqliteMessageQueue {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Append a pending message. Returns its id.
    pub async fn enqueue(&self, topic_id: &str, payload: &serde_json::Value) -> Result<i64> {
        let topic_id = topic_id.to_string();
        let payload = payload.to_string();
        self.store
            .with_conn(move |conn| {
                let now = now_ms();
                conn.execute(
                    "INSERT INTO topic_messages (topic_id, payload, status, created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![topic_id, payload, STATUS_PENDING, now],
                )
                .map_err(sql_err("enqueue message"))?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn set_status(&self, message_id: i64, status: &str) -> Result<bool> {
        let status = status.to_string();
        self.store
            .with_conn(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE topic_messages SET status = ?1, updated_at_ms = ?2 WHERE id = ?3",
                        params![status, now_ms(), message_id],
                    )
                    .map_err(sql_err("update message status"))?;
                Ok(changed == 1)
            })
            .await
    }

    /// Backdate a message, as if it had been untouched for `age`.
    pub async fn set_age(&self, message_id: i64, age: Duration) -> Result<bool> {
        self.store
            .with_conn(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE topic_messages SET updated_at_ms = ?1 WHERE id = ?2",
                        params![cutoff_ms(age), message_id],
                    )
                    .map_err(sql_err("backdate message"))?;
                Ok(changed == 1)
            })
            .await
    }

    pub async fn count(&self, topic_id: &str, status: &str) -> Result<usize> {
        let topic_id = topic_id.to_string();
        let status = status.to_string();
        self.store
            .with_conn(move |conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM topic_messages WHERE topic_id = ?1 AND status = ?2",
                        params![topic_id, status],
                        |row| row.get(0),
                    )
                    .map_err(sql_err("count messages"))?;
                Ok(count as usize)
            })
            .await
    }

    /// Put the stuck messages of one topic back in `pending` with a fresh
    /// timestamp and a bumped attempt counter. Returns how many moved.
    pub async fn requeue_stuck(&self, topic_id: &str, older_than: Duration) -> Result<usize> {
        let topic_id = topic_id.to_string();
        self.store
            .with_conn(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE topic_messages
                         SET status = ?1, attempts = attempts + 1, updated_at_ms = ?2
                         WHERE topic_id = ?3 AND status IN (?4, ?5) AND updated_at_ms < ?6",
                        params![
                            STATUS_PENDING,
                            now_ms(),
                            topic_id,
                            STATUS_PENDING,
                            STATUS_PROCESSING,
                            cutoff_ms(older_than)
                        ],
                    )
                    .map_err(sql_err("requeue stuck messages"))?;
                Ok(changed)
            })
            .await
    }

    async fn stale_topics(&self, older_than: Duration, limit: usize) -> Result<Vec<CompensationUnit>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT topic_id, COUNT(*) AS stuck, MIN(updated_at_ms) AS oldest
                         FROM topic_messages
                         WHERE status IN (?1, ?2) AND updated_at_ms < ?3
                         GROUP BY topic_id
                         ORDER BY oldest ASC
                         LIMIT ?4",
                    )
                    .map_err(sql_err("prepare stale topic scan"))?;
                let discovered_at_ms = now_ms();
                let rows = stmt
                    .query_map(
                        params![STATUS_PENDING, STATUS_PROCESSING, cutoff_ms(older_than), limit],
                        |row| {
                            Ok(CompensationUnit {
                                unit_key: row.get(0)?,
                                discovered_at_ms,
                                pending_items: row.get::<_, i64>(1)? as usize,
                            })
                        },
                    )
                    .map_err(sql_err("scan stale topics"))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(sql_err("read stale topic row"))
            })
            .await
    }
}

#[async_trait]
impl CompensationSource for SqliteMessageQueue {
    async fn scan_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> courier_jobs::Result<Vec<CompensationUnit>> {
        Ok(self.stale_topics(older_than, limit).await?)
    }
}
