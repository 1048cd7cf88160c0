use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Body of an offline catch-up pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchUpRequest {
    /// Opaque cursor returned by the previous page; `None` starts from the
    /// oldest undelivered item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,

    pub limit: u32,
}

/// One page of missed items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatchUpPage {
    #[serde(default)]
    pub items: Vec<JsonValue>,

    /// Cursor for the next page.
    #[serde(default)]
    pub page_token: Option<String>,

    #[serde(default)]
    pub has_more: bool,
}
