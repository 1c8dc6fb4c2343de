use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::connection::ConnectionOptions;
use crate::error::MetadataError;
use crate::feed::{ChatFeedConfig, RouteFeedConfig};

/// Environment variable that overrides `server_url`
pub const SERVER_URL_ENV: &str = "TRANSITEDGE_SERVER_URL";

const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub connection: ConnectionOptions,
    #[serde(default)]
    pub route: RouteFeedConfig,
    #[serde(default)]
    pub chat: ChatFeedConfig,
}

fn default_server_url() -> String {
    "http://localhost:5001".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            connection: ConnectionOptions::default(),
            route: RouteFeedConfig::default(),
            chat: ChatFeedConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment overrides on top of file or default values
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        let url = Url::parse(&self.server_url).map_err(|e| {
            MetadataError::Validation(format!("invalid server_url {:?}: {}", self.server_url, e))
        })?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(MetadataError::Validation(format!(
                "unsupported server_url scheme: {}",
                url.scheme()
            )));
        }
        self.connection.validate()?;
        self.route.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server_url: http://transit.example.com:5001
connection:
  reconnection: true
  reconnection_delay_ms: 500
  reconnection_delay_max_ms: 4000
  reconnection_attempts: 3
route:
  poll_interval_secs: 10
chat:
  default_sender: Dispatcher
"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.server_url, "http://transit.example.com:5001");
        assert_eq!(config.connection.reconnection_attempts, 3);
        assert_eq!(config.route.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.chat.default_sender, "Dispatcher");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: ClientConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let result = ClientConfig::load(Path::new("/nonexistent/transitedge.yaml"));
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = ClientConfig {
            server_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            server_url: "ftp://example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
