use std::fmt;

/// Readiness of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "connecting"),
            ReadyState::Open => write!(f, "open"),
            ReadyState::Closing => write!(f, "closing"),
            ReadyState::Closed => write!(f, "closed"),
        }
    }
}
