//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the packets a websocket client needs are understood. Binary
//! attachments are not supported.

use serde::Deserialize;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::Frame;

/// Socket.IO connect request for the default namespace
pub const CONNECT: &str = "40";

/// Engine.IO pong, the reply to a server ping
pub const PONG: &str = "3";

/// Engine.IO open packet payload
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    /// Server ping period in milliseconds
    pub ping_interval: u64,
    /// Grace period after a missed ping in milliseconds
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO open (`0{...}`)
    Open(Handshake),
    /// Engine.IO close (`1`)
    Close,
    /// Engine.IO ping (`2`)
    Ping,
    /// Engine.IO pong (`3`)
    Pong,
    /// Socket.IO namespace connected (`40`)
    Connect,
    /// Socket.IO namespace disconnect (`41`)
    Disconnect,
    /// Socket.IO event (`42["name", payload]`)
    Event(Frame),
    /// Socket.IO connect refused (`44{...}`)
    ConnectError(String),
    /// Anything a client may safely ignore (noop, upgrade, acks)
    Ignored,
}

pub fn decode(text: &str) -> Result<Packet, TransportError> {
    let mut chars = text.chars();
    let engine_type = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty packet".to_string()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(TransportError::Protocol(format!(
            "unknown engine packet type: {}",
            other
        ))),
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, TransportError> {
    let mut chars = body.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty socket packet".to_string()))?;
    let data = skip_namespace(chars.as_str());

    match socket_type {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(data.trim_start_matches(|c: char| c.is_ascii_digit())),
        '3' => Ok(Packet::Ignored),
        '4' => {
            let message = serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| data.to_string());
            Ok(Packet::ConnectError(message))
        }
        '5' | '6' => Err(TransportError::Protocol(
            "binary packets are not supported".to_string(),
        )),
        other => Err(TransportError::Protocol(format!(
            "unknown socket packet type: {}",
            other
        ))),
    }
}

/// Strip a `/namespace,` prefix if present
fn skip_namespace(data: &str) -> &str {
    if data.starts_with('/') {
        match data.find(',') {
            Some(idx) => &data[idx + 1..],
            None => "",
        }
    } else {
        data
    }
}

fn decode_event(data: &str) -> Result<Packet, TransportError> {
    let mut items: Vec<Value> = serde_json::from_str(data)?;
    if items.is_empty() {
        return Err(TransportError::Protocol("event without a name".to_string()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(TransportError::Protocol(format!(
                "event name is not a string: {}",
                other
            )))
        }
    };
    let payload = match items.len() {
        0 => Value::Null,
        1 => items.remove(0),
        _ => Value::Array(items),
    };
    Ok(Packet::Event(Frame::new(name, payload)))
}

/// Encode an outbound event as `42["name", payload]`; null payloads are omitted
pub fn encode_event(frame: &Frame) -> Result<String, TransportError> {
    let mut items = vec![Value::String(frame.event.clone())];
    if !frame.payload.is_null() {
        items.push(frame.payload.clone());
    }
    Ok(format!("42{}", serde_json::to_string(&items)?))
}
