use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MetadataError;

/// Sender name used when a chat message carries none
pub const DEFAULT_SENDER: &str = "Anonymous";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteFeedConfig {
    /// Seconds between `get_route` refresh requests while connected
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for RouteFeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl RouteFeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.poll_interval_secs == 0 {
            return Err(MetadataError::Validation(
                "route.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFeedConfig {
    /// Sender attached to outgoing messages when the caller gives a blank name
    #[serde(default = "default_sender")]
    pub default_sender: String,
}

fn default_sender() -> String {
    DEFAULT_SENDER.to_string()
}

impl Default for ChatFeedConfig {
    fn default() -> Self {
        Self {
            default_sender: default_sender(),
        }
    }
}
