//! # courier-link
//!
//! Client for the courier real-time delivery protocol.
//!
//! This crate provides:
//! - **Codec**: single-character framed packets with optional ack ids and
//!   double-encoded payload handling
//! - **HeartbeatMonitor**: ping/pong liveness with server-negotiated timing
//! - **ReconnectController**: bounded reconnection with fixed or exponential backoff
//! - **RequestCorrelator**: ack-id keyed request/response pairing that settles exactly once
//! - **ConnectionManager**: owner of one logical connection, emitting lifecycle
//!   and business-message events
//! - **CatchUpClient**: paginated HTTP pull of items missed while offline
//!
//! ## Connection lifecycle
//! ```text
//! Closed → Connecting → Open → Closing → Closed
//!              ↑          ↓ (abnormal loss)
//!              └── backoff ┘ ... → reload required (after max attempts)
//! ```

pub mod catch_up;
pub mod codec;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod event_handlers;
pub mod heartbeat;
pub mod models;
pub mod reconnect;
pub mod timeouts;

pub use catch_up::CatchUpClient;
pub use connection::ConnectionManager;
pub use correlator::{PendingRequest, RequestCorrelator};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers, HeartbeatViolation};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus};
pub use models::{
    BusinessMessage, CatchUpPage, CatchUpRequest, ConnectionOptions, HeartbeatPolicy,
    OpenHandshake, Packet, PacketKind, ReadyState, ResponseEnvelope, RESPONSE_OK_CODE,
};
pub use reconnect::{BackoffStrategy, ReconnectController, ReconnectDecision, ReconnectState};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
