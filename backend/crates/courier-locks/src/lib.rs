//! # courier-locks
//!
//! Mutual exclusion for scheduled runs across server instances.
//!
//! - **LockKey**: `<feature>:<scope>:<id>` names, so features sharing one
//!   store never collide
//! - **OwnerToken**: random per acquisition attempt; required to release
//! - **LockStore**: storage seam with an in-memory and a SQLite implementation
//! - **LockManager**: `acquire` (single attempt), `spin_acquire` (retry until a
//!   deadline) and `release` (compare-and-delete, never an error)
//!
//! Every lock carries a TTL so a crashed holder's lock eventually frees
//! itself.

pub mod error;
pub mod key;
pub mod manager;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{LockError, Result};
pub use key::{LockKey, OwnerToken};
pub use manager::{LockManager, MAX_LOCK_TTL};
pub use memory::MemoryLockStore;
pub use sqlite::SqliteLockStore;
pub use store::LockStore;
