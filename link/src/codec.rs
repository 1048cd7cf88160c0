//! Packet framing.
//!
//! Every frame starts with a single control character:
//!
//! | prefix | kind    | body                                     |
//! |--------|---------|------------------------------------------|
//! | `0`    | open    | JSON handshake (`pingInterval`, ...)     |
//! | `1`    | close   | optional reason text                     |
//! | `2`    | ping    | none                                     |
//! | `3`    | pong    | none                                     |
//! | `4`    | message | optional decimal ack id + `[event, body]`|
//!
//! A message body may carry its payload JSON-encoded twice (a JSON string
//! holding JSON); [`decode`] unwraps one extra level in that case.

use serde_json::Value as JsonValue;

use crate::error::{LinkError, Result};
use crate::models::{OpenHandshake, Packet, PacketKind};

impl PacketKind {
    /// Wire prefix for this kind.
    pub fn prefix(self) -> char {
        match self {
            PacketKind::Open => '0',
            PacketKind::Close => '1',
            PacketKind::Ping => '2',
            PacketKind::Pong => '3',
            PacketKind::Message => '4',
        }
    }

    /// Parse a wire prefix.
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            '0' => Some(PacketKind::Open),
            '1' => Some(PacketKind::Close),
            '2' => Some(PacketKind::Ping),
            '3' => Some(PacketKind::Pong),
            '4' => Some(PacketKind::Message),
            _ => None,
        }
    }
}

/// Encode a data packet.
pub fn encode_message(event_type: &str, payload: &JsonValue, ack_id: Option<u64>) -> Result<String> {
    encode(&Packet::message(event_type, payload.clone(), ack_id))
}

/// Encode any packet into its text frame.
pub fn encode(packet: &Packet) -> Result<String> {
    let mut out = String::new();
    out.push(packet.kind.prefix());

    match packet.kind {
        PacketKind::Ping | PacketKind::Pong => {},
        PacketKind::Open => {
            if let Some(payload) = &packet.payload {
                out.push_str(&serde_json::to_string(payload)?);
            }
        },
        PacketKind::Close => {
            if let Some(JsonValue::String(reason)) = &packet.payload {
                out.push_str(reason);
            }
        },
        PacketKind::Message => {
            let event_type = packet.event_type.as_deref().ok_or_else(|| {
                LinkError::MalformedPacket("message packet without event type".to_string())
            })?;
            if let Some(ack) = packet.ack_id {
                out.push_str(&ack.to_string());
            }
            let body = JsonValue::Array(vec![
                JsonValue::String(event_type.to_string()),
                packet.payload.clone().unwrap_or(JsonValue::Null),
            ]);
            out.push_str(&serde_json::to_string(&body)?);
        },
    }

    Ok(out)
}

/// Decode a text frame.
///
/// Fails with [`LinkError::MalformedPacket`] when the prefix is unknown or the
/// body cannot be parsed; the connection logs and drops such frames.
pub fn decode(frame: &str) -> Result<Packet> {
    let mut chars = frame.chars();
    let prefix = chars
        .next()
        .ok_or_else(|| LinkError::MalformedPacket("empty frame".to_string()))?;
    let kind = PacketKind::from_prefix(prefix)
        .ok_or_else(|| LinkError::MalformedPacket(format!("unknown prefix '{}'", prefix)))?;
    let rest = chars.as_str();

    match kind {
        PacketKind::Ping | PacketKind::Pong => Ok(Packet::control(kind)),
        PacketKind::Close => {
            let mut packet = Packet::control(kind);
            if !rest.is_empty() {
                packet.payload = Some(JsonValue::String(rest.to_string()));
            }
            Ok(packet)
        },
        PacketKind::Open => {
            let mut packet = Packet::control(kind);
            if !rest.trim().is_empty() {
                let payload: JsonValue = serde_json::from_str(rest).map_err(|e| {
                    LinkError::MalformedPacket(format!("invalid open handshake: {}", e))
                })?;
                packet.payload = Some(payload);
            }
            Ok(packet)
        },
        PacketKind::Message => decode_message(rest),
    }
}

fn decode_message(rest: &str) -> Result<Packet> {
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    let (ack_part, body) = rest.split_at(digits);
    let ack_id = if ack_part.is_empty() {
        None
    } else {
        Some(ack_part.parse::<u64>().map_err(|e| {
            LinkError::MalformedPacket(format!("invalid ack id '{}': {}", ack_part, e))
        })?)
    };

    let parsed: JsonValue = serde_json::from_str(body)
        .map_err(|e| LinkError::MalformedPacket(format!("invalid message body: {}", e)))?;
    let mut items = match parsed {
        JsonValue::Array(items) if !items.is_empty() => items,
        other => {
            return Err(LinkError::MalformedPacket(format!(
                "message body must be a non-empty array, got {}",
                other
            )))
        },
    };

    let payload = if items.len() > 1 {
        Some(unwrap_double_encoded(items.swap_remove(1)))
    } else {
        None
    };
    let event_type = match items.swap_remove(0) {
        JsonValue::String(s) => s,
        other => {
            return Err(LinkError::MalformedPacket(format!(
                "event type must be a string, got {}",
                other
            )))
        },
    };

    Ok(Packet {
        kind: PacketKind::Message,
        ack_id,
        event_type: Some(event_type),
        payload,
    })
}

/// Second parse pass for payloads that arrive as a JSON string holding JSON.
/// Plain strings that are not JSON documents are returned unchanged.
pub fn unwrap_double_encoded(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(ref s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(s).unwrap_or(value)
            } else {
                value
            }
        },
        other => other,
    }
}

/// Read the heartbeat parameters out of an open packet.
pub fn parse_handshake(packet: &Packet) -> Option<OpenHandshake> {
    if packet.kind != PacketKind::Open {
        return None;
    }
    packet
        .payload
        .as_ref()
        .and_then(|p| serde_json::from_value::<OpenHandshake>(p.clone()).ok())
}
