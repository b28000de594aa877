/*!
Builders for payloads as they travel on the bus
*/

use serde_json::Value;

/// Check request payloads, as a scheduler would publish them
pub struct MessageBuilder;

impl MessageBuilder {
    /// `{"name", "command", "issued"}`
    pub fn command_request<N: Into<String>, C: Into<String>>(name: N, command: C) -> Value {
        serde_json::json!({
            "name": name.into(),
            "command": command.into(),
            "issued": chrono::Utc::now().timestamp(),
        })
    }

    /// `{"name", "extension", "issued"}`
    pub fn extension_request<N: Into<String>, E: Into<String>>(name: N, extension: E) -> Value {
        serde_json::json!({
            "name": name.into(),
            "extension": extension.into(),
            "issued": chrono::Utc::now().timestamp(),
        })
    }

    /// A request carrying nothing to run
    pub fn empty_request() -> Value {
        serde_json::json!({})
    }

    pub fn to_bytes(value: &Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }
}
