use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::key::{LockKey, OwnerToken};

/// Storage seam for locks.
///
/// Implementations must make `try_insert` and `compare_and_delete` atomic
/// with respect to each other for the same key.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Record `owner` as holder of `key` for `ttl` unless a live holder
    /// exists. An expired holder is replaced. Returns `true` on success.
    async fn try_insert(&self, key: &LockKey, owner: &OwnerToken, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if `owner` is the stored holder. Returns `true` if
    /// this call deleted it.
    async fn compare_and_delete(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool>;

    /// Live holder of `key`, if any.
    async fn current_owner(&self, key: &LockKey) -> Result<Option<OwnerToken>>;
}
