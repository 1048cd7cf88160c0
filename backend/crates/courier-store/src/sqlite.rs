//! Shared SQLite handle for the work tables.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Sqlite(format!("create store dir {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Sqlite(format!("open sqlite store: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Sqlite(format!("open in-memory store: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::Sqlite(format!("set busy timeout: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Sqlite("sqlite store mutex poisoned".to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS topic_messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              topic_id TEXT NOT NULL,
              payload TEXT NOT NULL,
              status TEXT NOT NULL,
              attempts INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_runs (
              run_id TEXT PRIMARY KEY,
              status TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_topic_messages_status_updated ON topic_messages(status, updated_at_ms);
            CREATE INDEX IF NOT EXISTS idx_topic_messages_topic ON topic_messages(topic_id, status);
            CREATE INDEX IF NOT EXISTS idx_task_runs_status_updated ON task_runs(status, updated_at_ms);
            "#,
        )
        .map_err(|e| StoreError::Sqlite(format!("init store schema: {}", e)))?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Sqlite("sqlite store mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await?
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `now - age` in epoch milliseconds, saturating.
pub(crate) fn cutoff_ms(age: Duration) -> i64 {
    now_ms().saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX))
}

pub(crate) fn sql_err(context: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::Sqlite(format!("{}: {}", context, e))
}
