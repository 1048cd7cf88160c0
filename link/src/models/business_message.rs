use serde_json::Value as JsonValue;

/// Application-level message demultiplexed out of a data packet.
///
/// Emitted when a packet's payload is an object with a string `type` field,
/// so business consumers never see transport framing.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessMessage {
    /// Event type of the carrying packet.
    pub event_type: String,
    /// Value of the payload's `type` field.
    pub message_type: String,
    pub body: JsonValue,
}

impl BusinessMessage {
    pub(crate) fn from_packet(event_type: &str, payload: &JsonValue) -> Option<Self> {
        let message_type = payload.get("type")?.as_str()?;
        Some(Self {
            event_type: event_type.to_string(),
            message_type: message_type.to_string(),
            body: payload.clone(),
        })
    }
}
