//! Downstream peer wire format
//!
//! Outbound commands are JSON text frames:
//!
//! ```json
//! {"id": "<uuid>", "type": "browser_screenshot", "payload": {"fullPage": true}}
//! ```
//!
//! Peers may answer with an envelope (`{"id": .., "payload": ..}` or
//! `{"id": .., "error": ".."}`) or with the bare payload. Correlation is FIFO;
//! an envelope id, when present, must match the outstanding command.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Keys allowed in a reply envelope
const ENVELOPE_KEYS: [&str; 4] = ["id", "type", "payload", "error"];

/// A command sent to the downstream peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCommand {
    /// Call identifier, echoed back by peers that support it
    pub id: Uuid,
    /// Command name (e.g., "browser_get_console_logs")
    #[serde(rename = "type")]
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PeerCommand {
    pub fn new(command: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            payload,
        }
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A reply received from the downstream peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerReply {
    /// Echoed call id, if the peer sent one
    pub id: Option<String>,
    /// Payload on success, peer-reported message on failure
    pub outcome: Result<serde_json::Value, String>,
}

impl PeerReply {
    /// Successful reply without an id
    pub fn payload(payload: serde_json::Value) -> Self {
        Self {
            id: None,
            outcome: Ok(payload),
        }
    }

    /// Decode a text frame
    ///
    /// Never fails: anything that is not an envelope is taken as the payload
    /// itself, and non-JSON text becomes a string payload.
    pub fn decode(text: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Self::payload(serde_json::Value::String(text.to_string())),
        };

        let serde_json::Value::Object(map) = &value else {
            return Self::payload(value);
        };

        let is_envelope = (map.contains_key("payload") || map.contains_key("error"))
            && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str()));
        if !is_envelope {
            return Self::payload(value);
        }

        let id = match map.get("id") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let outcome = match map.get("error") {
            Some(serde_json::Value::Null) | None => {
                Ok(map.get("payload").cloned().unwrap_or(serde_json::Value::Null))
            }
            Some(serde_json::Value::String(msg)) => Err(msg.clone()),
            Some(other) => Err(other.to_string()),
        };

        Self { id, outcome }
    }

    /// Whether this reply may answer the command with the given id
    pub fn answers(&self, call_id: &Uuid) -> bool {
        match &self.id {
            None => true,
            Some(id) => Uuid::parse_str(id).map(|u| u == *call_id).unwrap_or(false),
        }
    }
}
