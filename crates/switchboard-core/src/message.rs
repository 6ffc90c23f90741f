//! The JSON envelope exchanged with clients in both directions.
//!
//! ```json
//! { "type": "chat_message", "data": {...}, "timestamp": "2026-01-01T00:00:00Z", "id": "m1" }
//! ```
//!
//! The hub never interprets `data`; it is carried as an opaque
//! [`serde_json::Value`] and decoded by the application handler based on
//! `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HubError, Result};

/// A typed message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Application-level message type.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Opaque payload. Missing on the wire means `null`.
    #[serde(default)]
    pub data: Value,
    /// RFC 3339 timestamp. Inbound frames without one are stamped on decode.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Optional client-chosen message ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl WireMessage {
    /// Build an envelope stamped with the current time.
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            timestamp: Utc::now(),
            id: None,
        }
    }

    /// Attach a message ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Convert any serializable payload into an envelope.
    ///
    /// Fails with [`HubError::Serialization`] if `data` cannot be represented
    /// as JSON (e.g. a map with non-string keys).
    pub fn from_payload<T: Serialize + ?Sized>(msg_type: &str, data: &T) -> Result<Self> {
        let data = serde_json::to_value(data)?;
        Ok(Self::new(msg_type, data))
    }

    /// Serialize to the text that goes on the wire.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an inbound frame. A missing or empty `type` is rejected.
    pub fn decode(text: &str) -> Result<Self> {
        let msg: Self = serde_json::from_str(text).map_err(|e| HubError::Decode(e.to_string()))?;
        if msg.msg_type.is_empty() {
            return Err(HubError::Decode("message type is empty".into()));
        }
        Ok(msg)
    }
}

/// Serialize `(type, data)` once into the wire text shared by every recipient.
pub fn encode_payload<T: Serialize + ?Sized>(msg_type: &str, data: &T) -> Result<String> {
    WireMessage::from_payload(msg_type, data)?.encode()
}
