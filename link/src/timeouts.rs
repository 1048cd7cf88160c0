//! Timeout configuration for courier client operations.
//!
//! Provides centralized timeout management for the WebSocket handshake,
//! outbound writes, correlated requests and the heartbeat defaults that apply
//! until the server's `open` packet is negotiated.

use std::time::Duration;

/// Timeout configuration for client operations.
///
/// # Examples
///
/// ```rust
/// use courier_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = LinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = LinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .request_timeout(Duration::from_secs(10))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Timeout for establishing the WebSocket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for writing one frame to the socket.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Timeout for a correlated request to receive its response.
    /// Default: 3 seconds
    pub request_timeout: Duration,

    /// Heartbeat ping interval used before the server announces its own.
    /// Default: 25 seconds
    pub default_ping_interval: Duration,

    /// Pong deadline used before the server announces its own.
    /// Default: 20 seconds
    pub default_ping_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3),
            default_ping_interval: Duration::from_secs(25),
            default_ping_timeout: Duration::from_secs(20),
        }
    }
}

impl LinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Short timeouts for local development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(1),
            default_ping_interval: Duration::from_secs(5),
            default_ping_timeout: Duration::from_secs(3),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`LinkTimeouts`].
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    pub fn default_ping_interval(mut self, interval: Duration) -> Self {
        self.timeouts.default_ping_interval = interval;
        self
    }

    pub fn default_ping_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.default_ping_timeout = timeout;
        self
    }

    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}
