use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{LinkError, Result};

/// Envelope code that marks a successful response.
pub const RESPONSE_OK_CODE: i64 = 1000;

/// Standard response wrapper used by correlated requests and HTTP pulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i64,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub data: JsonValue,
}

impl ResponseEnvelope {
    pub fn is_ok(&self) -> bool {
        self.code == RESPONSE_OK_CODE
    }

    /// Resolve to the embedded data, or reject with the envelope's code.
    pub fn into_result(self) -> Result<JsonValue> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(LinkError::Rejected {
                code: self.code,
                message: self.message,
            })
        }
    }

    /// Interpret a raw response payload as an envelope.
    pub fn from_payload(payload: JsonValue) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| {
            LinkError::SerializationError(format!("response is not an envelope: {}", e))
        })
    }
}
