//! Error types for courier-link.

use thiserror::Error;

/// Result alias used across the client.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors surfaced by the client.
///
/// Transport-level problems (`WebSocketError`, `MalformedPacket`) are normally
/// handled inside the connection task and reported through
/// [`EventHandlers`](crate::EventHandlers); only request-scoped failures reach
/// the caller of [`ConnectionManager::send_async`](crate::ConnectionManager::send_async).
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// The server answered a correlated request with a non-OK envelope code.
    #[error("Request rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    #[error("Connection is not open")]
    NotConnected,

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LinkError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::NetworkError(_)
                | LinkError::TimeoutError(_)
                | LinkError::WebSocketError(_)
                | LinkError::NotConnected
                | LinkError::ConnectionClosed(_)
        )
    }

    /// Envelope code carried by a rejection, if any.
    pub fn rejection_code(&self) -> Option<i64> {
        match self {
            LinkError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::TimeoutError(err.to_string())
        } else if err.is_decode() {
            LinkError::SerializationError(err.to_string())
        } else {
            LinkError::NetworkError(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::WebSocketError(err.to_string())
    }
}
