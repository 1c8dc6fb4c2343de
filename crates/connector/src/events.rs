//! Lifecycle events published by a connection
//!
//! Every connection owns a broadcast channel of [`LifecycleEvent`]s. This is
//! the diagnostic channel: failures are reported here (and logged) instead of
//! being returned as errors, so consumers can warn users without the
//! connection ever failing outright.

use std::time::Duration;

use crate::liveness::Liveness;

/// Capacity of the per-connection lifecycle broadcast channel
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Inbound event name the server uses to report request failures
pub const SERVER_ERROR_EVENT: &str = "error";

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Liveness moved to a new state
    StateChanged(Liveness),
    /// A connect attempt failed before the session opened
    ConnectFailed { error: String },
    /// An open session ended (server close, network failure, heartbeat timeout)
    ConnectionLost { reason: String },
    /// A reconnect attempt will start after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// No attempts remain; the connection stays disconnected until re-activated
    RetriesExhausted { attempts: u32 },
    /// An outbound event was dropped because the connection was not live
    EmitRejected { event: String },
    /// The server pushed an `error` event
    ServerError { message: String },
}

impl LifecycleEvent {
    /// Whether this event reports a problem worth surfacing to a user
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::ConnectFailed { .. }
                | LifecycleEvent::ConnectionLost { .. }
                | LifecycleEvent::RetriesExhausted { .. }
                | LifecycleEvent::EmitRejected { .. }
                | LifecycleEvent::ServerError { .. }
        )
    }
}
