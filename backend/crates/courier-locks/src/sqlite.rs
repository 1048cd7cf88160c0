//! SQLite-backed lock store shared by every process that opens the same file.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{LockError, Result};
use crate::key::{LockKey, OwnerToken};
use crate::store::LockStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LockError::Backend(format!("create lock store dir {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| LockError::Backend(format!("open sqlite lock store: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LockError::Backend(format!("open in-memory lock store: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LockError::Backend(format!("set busy timeout: {}", e)))?;
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
            .map_err(|_| LockError::Backend("sqlite lock store mutex poisoned".to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS courier_locks (
              lock_key TEXT PRIMARY KEY,
              owner TEXT NOT NULL,
              expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_courier_locks_expiry ON courier_locks(expires_at_ms);
            "#,
        )
        .map_err(|e| LockError::Backend(format!("init lock schema: {}", e)))?;
        Ok(())
    }

    /// Delete rows whose TTL has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM courier_locks WHERE expires_at_ms <= ?1",
                params![now_ms()],
            )
            .map_err(|e| LockError::Backend(format!("purge expired locks: {}", e)))
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| LockError::Backend("sqlite lock store mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_insert(&self, key: &LockKey, owner: &OwnerToken, ttl: Duration) -> Result<bool> {
        let key = key.as_str().to_string();
        let owner = owner.as_str().to_string();
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| LockError::InvalidTtl(format!("{:?} does not fit in millis", ttl)))?;
        self.with_conn(move |conn| {
            let now = now_ms();
            let expires_at_ms = now
                .checked_add(ttl_ms)
                .ok_or_else(|| LockError::InvalidTtl(format!("{}ms overflows the clock", ttl_ms)))?;
            // The conflict branch only fires for an expired holder; a live one
            // leaves the row untouched and zero rows changed.
            let changed = conn
                .execute(
                    "INSERT INTO courier_locks (lock_key, owner, expires_at_ms)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(lock_key) DO UPDATE
                       SET owner = excluded.owner, expires_at_ms = excluded.expires_at_ms
                       WHERE courier_locks.expires_at_ms <= ?4",
                    params![key, owner, expires_at_ms, now],
                )
                .map_err(|e| LockError::Backend(format!("acquire lock {}: {}", key, e)))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool> {
        let key = key.as_str().to_string();
        let owner = owner.as_str().to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM courier_locks WHERE lock_key = ?1 AND owner = ?2",
                    params![key, owner],
                )
                .map_err(|e| LockError::Backend(format!("release lock {}: {}", key, e)))?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn current_owner(&self, key: &LockKey) -> Result<Option<OwnerToken>> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT owner FROM courier_locks WHERE lock_key = ?1 AND expires_at_ms > ?2",
                params![key, now_ms()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|owner| owner.map(OwnerToken::from_stored))
            .map_err(|e| LockError::Backend(format!("read lock {}: {}", key, e)))
        })
        .await
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
