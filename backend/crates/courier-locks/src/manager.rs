use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{LockError, Result};
use crate::key::{LockKey, OwnerToken};
use crate::store::LockStore;

const DEFAULT_SPIN_INTERVAL: Duration = Duration::from_millis(50);

/// Longest TTL a lock may carry. A crashed holder frees its lock within it.
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Acquire/release front-end over a [`LockStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    spin_interval: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            spin_interval: DEFAULT_SPIN_INTERVAL,
        }
    }

    pub fn with_spin_interval(mut self, spin_interval: Duration) -> Self {
        self.spin_interval = spin_interval.max(Duration::from_millis(1));
        self
    }

    /// Single non-blocking attempt. `Ok(false)` means someone else holds it.
    pub async fn acquire(&self, key: &LockKey, owner: &OwnerToken, ttl: Duration) -> Result<bool> {
        if ttl.is_zero() || ttl > MAX_LOCK_TTL {
            return Err(LockError::InvalidTtl(format!(
                "{:?} for {} (allowed: up to {:?})",
                ttl, key, MAX_LOCK_TTL
            )));
        }
        let acquired = self.store.try_insert(key, owner, ttl).await?;
        if acquired {
            log::debug!("Acquired lock {} (ttl {:?})", key, ttl);
        }
        Ok(acquired)
    }

    /// Retry [`acquire`](Self::acquire) every spin interval until it succeeds
    /// or `max_wait` elapses. Meant for rare, low-contention paths.
    pub async fn spin_acquire(
        &self,
        key: &LockKey,
        owner: &OwnerToken,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.acquire(key, owner, ttl).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                log::debug!("Gave up waiting for lock {} after {:?}", key, max_wait);
                return Ok(false);
            }
            tokio::time::sleep(self.spin_interval.min(deadline - now)).await;
        }
    }

    /// Compare-and-delete. A mismatched or missing holder, and a store error,
    /// are logged as warnings and reported as `false`.
    pub async fn release(&self, key: &LockKey, owner: &OwnerToken) -> bool {
        match self.store.compare_and_delete(key, owner).await {
            Ok(true) => {
                log::debug!("Released lock {}", key);
                true
            },
            Ok(false) => {
                log::warn!("Lock {} was not held by {} at release (expired or taken over)", key, owner);
                false
            },
            Err(e) => {
                log::warn!("Failed to release lock {}: {}", key, e);
                false
            },
        }
    }

    pub async fn holder(&self, key: &LockKey) -> Result<Option<OwnerToken>> {
        self.store.current_owner(key).await
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("spin_interval", &self.spin_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLockStore;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryLockStore::new()))
            .with_spin_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_never_frees_holder() {
        let locks = manager();
        for i in 0..16 {
            let key = LockKey::new("prop", "unit", &i.to_string());
            let (a, b) = (OwnerToken::new(), OwnerToken::new());
            assert!(locks.acquire(&key, &a, Duration::from_secs(60)).await.unwrap());
            assert!(!locks.release(&key, &b).await);
            assert_eq!(locks.holder(&key).await.unwrap(), Some(a.clone()));
            assert!(!locks.acquire(&key, &b, Duration::from_secs(60)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_ttl_must_be_positive_and_bounded() {
        let locks = manager();
        let key = LockKey::new("prop", "unit", "ttl");
        for ttl in [Duration::ZERO, MAX_LOCK_TTL + Duration::from_secs(1), Duration::from_secs(u64::MAX)] {
            let err = locks.acquire(&key, &OwnerToken::new(), ttl).await.unwrap_err();
            assert!(matches!(err, LockError::InvalidTtl(_)));
        }
        assert_eq!(locks.holder(&key).await.unwrap(), None);
        assert!(locks.acquire(&key, &OwnerToken::new(), MAX_LOCK_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_of_absent_lock_is_false() {
        let locks = manager();
        let key = LockKey::new("prop", "unit", "missing");
        assert!(!locks.release(&key, &OwnerToken::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_acquire_waits_for_release() {
        let locks = manager();
        let key = LockKey::new("init", "global", "run");
        let holder = OwnerToken::new();
        locks.acquire(&key, &holder, Duration::from_secs(60)).await.unwrap();

        let releaser = locks.clone();
        let (k, h) = (key.clone(), holder.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            releaser.release(&k, &h).await;
        });

        let waiter = OwnerToken::new();
        let got = locks
            .spin_acquire(&key, &waiter, Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(got);
        assert_eq!(locks.holder(&key).await.unwrap(), Some(waiter));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_acquire_times_out() {
        let locks = manager();
        let key = LockKey::new("init", "global", "run");
        locks.acquire(&key, &OwnerToken::new(), Duration::from_secs(60)).await.unwrap();

        let started = Instant::now();
        let got = locks
            .spin_acquire(&key, &OwnerToken::new(), Duration::from_secs(60), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!got);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
