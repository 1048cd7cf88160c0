//! courier-configs
//!
//! Server configuration types, loader and the live-polled job switches.

pub mod config;
pub mod live;

pub use config::*;
pub use config::defaults;
pub use config::defaults::{COMPENSATION_JOB_ID, RECONCILIATION_JOB_ID};
pub use live::{JobSwitches, LiveConfig};
