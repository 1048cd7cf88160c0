//! Local mirror of sandbox task runs.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::time::Duration;

use courier_jobs::{StatusRecord, StatusRepository};

use crate::error::Result;
use crate::sqlite::{cutoff_ms, now_ms, sql_err, SqliteStore};

#[derive(Clone)]
pub struct SqliteTaskRuns {
    store: SqliteStore,
}

impl SqliteTaskRuns {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Insert or overwrite a run's status, stamping it now.
    pub async fn upsert(&self, run_id: &str, status: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let status = status.to_string();
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO task_runs (run_id, status, updated_at_ms) VALUES (?1, ?2, ?3)
                     ON CONFLICT(run_id) DO UPDATE
                       SET status = excluded.status, updated_at_ms = excluded.updated_at_ms",
                    params![run_id, status, now_ms()],
                )
                .map_err(sql_err("upsert task run"))?;
                Ok(())
            })
            .await
    }

    /// Backdate a run, as if it had been untouched for `age`.
    pub async fn set_age(&self, run_id: &str, age: Duration) -> Result<bool> {
        let run_id = run_id.to_string();
        self.store
            .with_conn(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE task_runs SET updated_at_ms = ?1 WHERE run_id = ?2",
                        params![cutoff_ms(age), run_id],
                    )
                    .map_err(sql_err("backdate task run"))?;
                Ok(changed == 1)
            })
            .await
    }

    pub async fn status_of(&self, run_id: &str) -> Result<Option<String>> {
        let run_id = run_id.to_string();
        self.store
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT status FROM task_runs WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("read task run"))
            })
            .await
    }

    async fn stale(&self, status: &str, older_than: Duration, limit: usize) -> Result<Vec<StatusRecord>> {
        let status = status.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT run_id, status, updated_at_ms FROM task_runs
                         WHERE status = ?1 AND updated_at_ms < ?2
                         ORDER BY updated_at_ms ASC
                         LIMIT ?3",
                    )
                    .map_err(sql_err("prepare stale task run scan"))?;
                let rows = stmt
                    .query_map(params![status, cutoff_ms(older_than), limit], |row| {
                        Ok(StatusRecord {
                            record_id: row.get(0)?,
                            status: row.get(1)?,
                            updated_at_ms: row.get(2)?,
                        })
                    })
                    .map_err(sql_err("scan stale task runs"))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(sql_err("read task run row"))
            })
            .await
    }

    async fn overwrite(&self, current: &StatusRecord, status: &str) -> Result<bool> {
        let run_id = current.record_id.clone();
        let expected_status = current.status.clone();
        let expected_updated_at = current.updated_at_ms;
        let status = status.to_string();
        self.store
            .with_conn(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE task_runs SET status = ?1, updated_at_ms = ?2
                         WHERE run_id = ?3 AND status = ?4 AND updated_at_ms = ?5",
                        params![status, now_ms(), run_id, expected_status, expected_updated_at],
                    )
                    .map_err(sql_err("update task run status"))?;
                Ok(changed == 1)
            })
            .await
    }
}

#[async_trait]
impl StatusRepository for SqliteTaskRuns {
    async fn find_stale(
        &self,
        status: &str,
        older_than: Duration,
        limit: usize,
    ) -> courier_jobs::Result<Vec<StatusRecord>> {
        Ok(self.stale(status, older_than, limit).await?)
    }

    async fn update_status(
        &self,
        current: &StatusRecord,
        status: &str,
    ) -> courier_jobs::Result<bool> {
        Ok(self.overwrite(current, status).await?)
    }
}
