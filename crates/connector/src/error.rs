use thiserror::Error;

/// Why an outbound event was not sent. Rejected events are dropped, never queued.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("not connected, dropped event: {event}")]
    NotConnected { event: String },
    #[error("outbound buffer full, dropped event: {event}")]
    Backpressure { event: String },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
