use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One named event with its structured payload
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    /// `Value::Null` when the event carries no payload
    pub payload: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Event without a payload (e.g. `get_route`)
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }
}

/// An established session with the server.
///
/// Frames sent on `outbound` are pushed to the server. `inbound` yields
/// server events in delivery order; an `Err` item reports a transport failure
/// and the channel closes when the session ends. Dropping the link
/// disconnects.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Result<Frame, TransportError>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::Sender<Frame>,
        inbound: mpsc::Receiver<Result<Frame, TransportError>>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Transport abstraction for named-event sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to `endpoint`, resolving once it is ready for events
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError>;
}
