use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MetadataError;

/// Reconnection behaviour for a feed connection.
///
/// Delays grow exponentially from `reconnection_delay_ms` and are capped at
/// `reconnection_delay_max_ms`. After `reconnection_attempts` consecutive
/// failures the connection gives up and stays disconnected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reconnect automatically after a drop or a failed attempt
    #[serde(default = "default_reconnection")]
    pub reconnection: bool,

    /// Base delay before the first reconnect attempt
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,

    /// Upper bound for any single reconnect delay
    #[serde(default = "default_reconnection_delay_max_ms")]
    pub reconnection_delay_max_ms: u64,

    /// Consecutive reconnect attempts before giving up
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,
}

fn default_reconnection() -> bool {
    true
}

fn default_reconnection_delay_ms() -> u64 {
    1000
}

fn default_reconnection_delay_max_ms() -> u64 {
    5000
}

fn default_reconnection_attempts() -> u32 {
    5
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnection: default_reconnection(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            reconnection_delay_max_ms: default_reconnection_delay_max_ms(),
            reconnection_attempts: default_reconnection_attempts(),
        }
    }
}

impl ConnectionOptions {
    /// Options that never reconnect
    pub fn no_reconnect() -> Self {
        Self {
            reconnection: false,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `attempt` (zero-based):
    /// `min(reconnection_delay_ms * 2^attempt, reconnection_delay_max_ms)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let millis = 2u64
            .checked_pow(attempt)
            .and_then(|factor| self.reconnection_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(self.reconnection_delay_max_ms);
        Duration::from_millis(millis)
    }

    /// Whether another reconnect may be scheduled after `attempts` consecutive failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.reconnection && attempts < self.reconnection_attempts
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.reconnection_delay_max_ms < self.reconnection_delay_ms {
            return Err(MetadataError::Validation(format!(
                "reconnection_delay_max_ms ({}) is below reconnection_delay_ms ({})",
                self.reconnection_delay_max_ms, self.reconnection_delay_ms
            )));
        }
        Ok(())
    }
}
