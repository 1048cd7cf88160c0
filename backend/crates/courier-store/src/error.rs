use courier_jobs::JobError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Store task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Join(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Http(_) | StoreError::ServerError { .. } | StoreError::InvalidResponse(_) => {
                JobError::Status(err.to_string())
            },
            StoreError::Sqlite(_) | StoreError::Join(_) => JobError::Source(err.to_string()),
        }
    }
}
