//! Result types of the service façade.

use serde::{Deserialize, Serialize};

/// DSN description generated by the middleware for an event data model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsnDescription {
    /// Overlay name to pass to `create_overlay`
    pub overlay_name: String,
    /// DSN description text
    pub description: String,
}

/// Channel details returned by `get_channel`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub channel: serde_json::Value,
    #[serde(default)]
    pub scratch: serde_json::Value,
    #[serde(default)]
    pub qos: serde_json::Value,
}
