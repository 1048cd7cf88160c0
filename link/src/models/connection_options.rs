use serde::{Deserialize, Serialize};

/// What to do when the heartbeat monitor reports a stalled peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatPolicy {
    /// Log the violation and notify `on_heartbeat_violation`, keep the socket.
    #[default]
    LogOnly,
    /// Tear the socket down and enter the reconnect loop.
    Reconnect,
}

/// Connection-level options for the client.
///
/// These options control:
/// - Automatic reconnection on connection loss
/// - Reconnection timing (fixed or exponential) and the attempt cap
/// - The reaction to heartbeat violations
///
/// # Example
///
/// ```rust
/// use courier_link::{ConnectionOptions, HeartbeatPolicy};
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_exponential_backoff(true)
///     .with_max_reconnect_attempts(Some(5))
///     .with_heartbeat_policy(HeartbeatPolicy::Reconnect);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on abnormal connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Delay in milliseconds between reconnection attempts
    /// Default: 3000ms. With exponential backoff this is the initial delay.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the exponential backoff delay
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of consecutive failed attempts before giving up
    /// Default: Some(10). None retries forever, Some(0) disables reconnection.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,

    /// Double the delay after every failed attempt
    /// Default: false (fixed interval)
    #[serde(default)]
    pub exponential_backoff: bool,

    /// Reaction to a heartbeat violation
    /// Default: LogOnly
    #[serde(default)]
    pub heartbeat_policy: HeartbeatPolicy,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(10)
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            exponential_backoff: false,
            heartbeat_policy: HeartbeatPolicy::default(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay between reconnection attempts (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts
    /// Pass None for infinite retries, Some(0) to disable reconnection
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Switch between fixed and exponential backoff
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Set the heartbeat violation policy
    pub fn with_heartbeat_policy(mut self, policy: HeartbeatPolicy) -> Self {
        self.heartbeat_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ConnectionOptions::default();
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_delay_ms, 3000);
        assert_eq!(options.max_reconnect_attempts, Some(10));
        assert!(!options.exponential_backoff);
        assert_eq!(options.heartbeat_policy, HeartbeatPolicy::LogOnly);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let options: ConnectionOptions =
            serde_json::from_str(r#"{"heartbeat_policy":"reconnect"}"#).unwrap();
        assert_eq!(options.heartbeat_policy, HeartbeatPolicy::Reconnect);
        assert_eq!(options.max_reconnect_attempts, Some(10));
    }
}
