//! transitedge-connector: live feed runtime
//!
//! A resilient event-subscribed connection (lifecycle, bounded reconnect,
//! event dispatch, liveness-gated emits) and the two feeds built on it:
//! the polled route feed and the chat feed.

pub mod chat;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod liveness;
pub mod metrics;
pub mod route;
pub mod server;

pub use chat::{ChatFeed, ChatMessage, SendStatus};
pub use connection::{ConnectionConfig, ConnectionHandle, Refresh};
pub use dispatch::EventDispatch;
pub use error::EmitError;
pub use events::LifecycleEvent;
pub use liveness::Liveness;
pub use route::{percent_saved, RouteFeed, RouteSnapshot};
pub use server::{create_router, run_server, ServerState};
