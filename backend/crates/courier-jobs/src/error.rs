use courier_locks::LockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Scanning for work or reading local records failed.
    #[error("Source error: {0}")]
    Source(String),

    /// A unit handler reported failure.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The external status source could not answer.
    #[error("Status source error: {0}")]
    Status(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}
