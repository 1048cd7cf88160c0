use std::fmt;

use crate::error::{LockError, Result};

/// Namespaced lock name: `<feature>:<scope>:<id>`.
///
/// ```rust
/// use courier_locks::LockKey;
///
/// let key = LockKey::new("msg_queue_compensation", "topic", "42");
/// assert_eq!(key.as_str(), "msg_queue_compensation:topic:42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(feature: &str, scope: &str, id: &str) -> Self {
        Self(format!("{}:{}:{}", feature, scope, id))
    }

    /// Build `<prefix>:<id>` where `prefix` is already `<feature>:<scope>`.
    pub fn with_prefix(prefix: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{}:{}", prefix, id))
    }

    /// Validate an externally supplied key (e.g. from configuration).
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.splitn(3, ':').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(LockError::InvalidKey(format!(
                "'{}' is not of the form <feature>:<scope>:<id>",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn feature(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque proof of ownership, fresh for every acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Token prefixed with the holder's instance id, for readable lock tables.
    pub fn for_holder(holder: &str) -> Self {
        Self(format!("{}/{}", holder, uuid::Uuid::new_v4()))
    }

    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
