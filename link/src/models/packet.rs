use serde_json::Value as JsonValue;

/// Control type carried by the first character of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Open,
    Close,
    Ping,
    Pong,
    Message,
}

/// One decoded wire unit.
///
/// Only `Message` packets carry an `event_type`; `Open` carries the handshake
/// object as its payload and `Close` an optional reason string.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub ack_id: Option<u64>,
    pub event_type: Option<String>,
    pub payload: Option<JsonValue>,
}

impl Packet {
    /// A packet without body (ping, pong, bare close/open).
    pub fn control(kind: PacketKind) -> Self {
        Self {
            kind,
            ack_id: None,
            event_type: None,
            payload: None,
        }
    }

    /// A data packet.
    pub fn message(event_type: impl Into<String>, payload: JsonValue, ack_id: Option<u64>) -> Self {
        Self {
            kind: PacketKind::Message,
            ack_id,
            event_type: Some(event_type.into()),
            payload: Some(payload),
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == PacketKind::Message
    }
}
