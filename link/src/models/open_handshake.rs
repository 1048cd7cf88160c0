use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of the server's `open` packet.
///
/// The heartbeat monitor is reconfigured from these values; until the packet
/// arrives the client-side defaults apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHandshake {
    /// Session id assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,

    #[serde(rename = "pingTimeout")]
    pub ping_timeout_ms: u64,
}

impl OpenHandshake {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}
