//! # courier-store
//!
//! Concrete implementations of the `courier-jobs` seams:
//!
//! - [`SqliteMessageQueue`]: stale-topic scan over `topic_messages`
//! - [`RequeueHandler`]: re-arms a topic's stuck messages
//! - [`SqliteTaskRuns`]: stale `running` task runs and status overwrite
//! - [`HttpStatusSource`]: sandbox task status over HTTP

pub mod error;
pub mod http_status;
pub mod message_queue;
pub mod requeue;
pub mod sqlite;
pub mod task_runs;

pub use error::{Result, StoreError};
pub use http_status::HttpStatusSource;
pub use message_queue::{SqliteMessageQueue, STATUS_DELIVERED, STATUS_PENDING, STATUS_PROCESSING};
pub use requeue::RequeueHandler;
pub use sqlite::SqliteStore;
pub use task_runs::SqliteTaskRuns;
