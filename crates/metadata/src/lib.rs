//! transitedge-metadata: client configuration types
//!
//! Connection options shared by every feed, per-feed settings, and the
//! top-level client config loaded from YAML.

pub mod client;
pub mod connection;
pub mod error;
pub mod feed;

pub use client::{ClientConfig, SERVER_URL_ENV};
pub use connection::ConnectionOptions;
pub use error::MetadataError;
pub use feed::{ChatFeedConfig, RouteFeedConfig, DEFAULT_SENDER};
