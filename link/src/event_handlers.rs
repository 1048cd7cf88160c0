//! Connection lifecycle event handlers.
//!
//! Provides callback-based hooks for monitoring a [`ConnectionManager`](crate::ConnectionManager):
//!
//! - [`on_open`](EventHandlers::on_open): the transport is open
//! - [`on_close`](EventHandlers::on_close): the transport closed (normally or not)
//! - [`on_error`](EventHandlers::on_error): transport or protocol error
//! - [`on_message`](EventHandlers::on_message): every decoded data packet
//! - [`on_business_message`](EventHandlers::on_business_message): data packets
//!   demultiplexed by their payload `type`
//! - [`on_heartbeat_violation`](EventHandlers::on_heartbeat_violation): a pong was late or missing
//! - [`on_reload_required`](EventHandlers::on_reload_required): reconnection gave up
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send):
//!   raw frame debug hooks
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_open(|| println!("connected"))
//!     .on_close(|reason| println!("closed: {}", reason))
//!     .on_business_message(|msg| println!("{}: {}", msg.message_type, msg.body))
//!     .on_reload_required(|| eprintln!("connection lost for good, please reload"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{BusinessMessage, Packet};

/// Reason for a close event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
    /// Whether the close was expected (client close, close packet, code 1000).
    pub normal: bool,
}

impl DisconnectReason {
    pub fn normal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            normal: true,
        }
    }

    pub fn abnormal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            normal: false,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            normal: code == 1000,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    /// Whether auto-reconnect may recover from this error.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Details of a late or missing pong.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatViolation {
    pub elapsed: Duration,
    pub timeout: Duration,
}

pub type OnOpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnCloseCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnMessageCallback = Arc<dyn Fn(&Packet) + Send + Sync>;
pub type OnBusinessMessageCallback = Arc<dyn Fn(BusinessMessage) + Send + Sync>;
pub type OnHeartbeatViolationCallback = Arc<dyn Fn(HeartbeatViolation) + Send + Sync>;
pub type OnReloadRequiredCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnRawFrameCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers are `Send + Sync` and run on the
/// connection task, so they should return quickly.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_open: Option<OnOpenCallback>,
    pub(crate) on_close: Option<OnCloseCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_message: Option<OnMessageCallback>,
    pub(crate) on_business_message: Option<OnBusinessMessageCallback>,
    pub(crate) on_heartbeat_violation: Option<OnHeartbeatViolationCallback>,
    pub(crate) on_reload_required: Option<OnReloadRequiredCallback>,
    pub(crate) on_receive: Option<OnRawFrameCallback>,
    pub(crate) on_send: Option<OnRawFrameCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_business_message", &self.on_business_message.is_some())
            .field("on_heartbeat_violation", &self.on_heartbeat_violation.is_some())
            .field("on_reload_required", &self.on_reload_required.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Every decoded data packet that is not a correlated response.
    pub fn on_message(mut self, f: impl Fn(&Packet) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_business_message(
        mut self,
        f: impl Fn(BusinessMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_business_message = Some(Arc::new(f));
        self
    }

    pub fn on_heartbeat_violation(
        mut self,
        f: impl Fn(HeartbeatViolation) + Send + Sync + 'static,
    ) -> Self {
        self.on_heartbeat_violation = Some(Arc::new(f));
        self
    }

    /// Fired once when reconnection gives up; the application should offer
    /// a reload.
    pub fn on_reload_required(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reload_required = Some(Arc::new(f));
        self
    }

    /// Debug hook: every raw inbound frame before decoding.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Debug hook: every raw outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_open(&self) {
        if let Some(cb) = &self.on_open {
            cb();
        }
    }

    pub(crate) fn emit_close(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_close {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_message(&self, packet: &Packet) {
        if let Some(cb) = &self.on_message {
            cb(packet);
        }
    }

    pub(crate) fn emit_business_message(&self, message: BusinessMessage) {
        if let Some(cb) = &self.on_business_message {
            cb(message);
        }
    }

    pub(crate) fn emit_heartbeat_violation(&self, violation: HeartbeatViolation) {
        if let Some(cb) = &self.on_heartbeat_violation {
            cb(violation);
        }
    }

    pub(crate) fn emit_reload_required(&self) {
        if let Some(cb) = &self.on_reload_required {
            cb();
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unregistered_handlers_are_noops() {
        let handlers = EventHandlers::new();
        handlers.emit_open();
        handlers.emit_close(DisconnectReason::normal("bye"));
        handlers.emit_reload_required();
    }

    #[test]
    fn test_registered_handler_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handlers = EventHandlers::new().on_reload_required(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        handlers.emit_reload_required();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_code_classification() {
        assert!(DisconnectReason::with_code("bye", 1000).normal);
        assert!(!DisconnectReason::with_code("gone", 1006).normal);
        assert_eq!(DisconnectReason::with_code("gone", 1006).to_string(), "gone (code: 1006)");
    }
}
