//! Chat feed
//!
//! Append-only message log plus liveness-gated sends.

pub mod feed;
pub mod message;

pub use feed::{ChatFeed, SendStatus, CHAT_MESSAGE_EVENT};
pub use message::{ChatMessage, OutgoingChat};
