//! Process-local lock store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{LockError, Result};
use crate::key::{LockKey, OwnerToken};
use crate::store::LockStore;

#[derive(Debug, Clone)]
struct Held {
    owner: OwnerToken,
    expires_at: Instant,
}

/// Locks held in a `DashMap`; only excludes tasks within one process.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, Held>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, held| held.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_insert(&self, key: &LockKey, owner: &OwnerToken, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| LockError::InvalidTtl(format!("{:?} overflows the clock", ttl)))?;
        let held = Held {
            owner: owner.clone(),
            expires_at,
        };
        match self.entries.entry(key.as_str().to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(held);
                    Ok(true)
                } else {
                    Ok(false)
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(held);
                Ok(true)
            },
        }
    }

    async fn compare_and_delete(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(key.as_str(), |_, held| held.owner == *owner)
            .is_some())
    }

    async fn current_owner(&self, key: &LockKey) -> Result<Option<OwnerToken>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key.as_str())
            .filter(|held| held.expires_at > now)
            .map(|held| held.owner.clone()))
    }
}
