use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use transitedge_metadata::DEFAULT_SENDER;

/// One entry of the chat log, as echoed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
    /// Seconds since epoch, assigned by the server
    pub timestamp: f64,
}

impl ChatMessage {
    /// Decode an inbound payload without validating it.
    ///
    /// A missing or blank sender becomes "Anonymous", a missing body becomes
    /// empty, and a missing timestamp becomes zero.
    pub fn from_payload(payload: &Value) -> Self {
        let sender = payload
            .get("sender")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SENDER)
            .to_string();

        let message = match payload.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        Self {
            sender,
            message,
            timestamp,
        }
    }

    /// Server receipt time, if the timestamp is usable
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() || self.timestamp <= 0.0 {
            return None;
        }
        let whole = self.timestamp.floor();
        let nanos = ((self.timestamp - whole) * 1e9) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

/// Outbound `chat_message` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingChat<'a> {
    pub message: &'a str,
    pub sender: &'a str,
}
