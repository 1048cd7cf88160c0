//! Data models for the courier client.
//!
//! Wire packets, the open handshake, connection options and the envelopes
//! returned by correlated requests and catch-up pulls.

pub mod business_message;
pub mod catch_up_page;
pub mod connection_options;
pub mod open_handshake;
pub mod packet;
pub mod ready_state;
pub mod response_envelope;

pub use business_message::BusinessMessage;
pub use catch_up_page::{CatchUpPage, CatchUpRequest};
pub use connection_options::{ConnectionOptions, HeartbeatPolicy};
pub use open_handshake::OpenHandshake;
pub use packet::{Packet, PacketKind};
pub use ready_state::ReadyState;
pub use response_envelope::{ResponseEnvelope, RESPONSE_OK_CODE};
