use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Invalid lock key: {0}")]
    InvalidKey(String),

    #[error("Invalid lock TTL: {0}")]
    InvalidTtl(String),

    #[error("Lock store error: {0}")]
    Backend(String),

    #[error("Lock store task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for LockError {
    fn from(err: tokio::task::JoinError) -> Self {
        LockError::Join(err.to_string())
    }
}
