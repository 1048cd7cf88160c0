pub mod defaults;
mod loader;
pub mod types;

pub use types::*;
pub use loader::MAX_LOCK_TTL_SECS;
