use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

use transitedge_metadata::{ChatFeedConfig, ConnectionOptions};
use transitedge_middleware::{Frame, Transport};

use crate::chat::message::{ChatMessage, OutgoingChat};
use crate::connection::{ConnectionConfig, ConnectionHandle};
use crate::error::EmitError;

/// Chat event name, used both inbound (server echo) and outbound (send)
pub const CHAT_MESSAGE_EVENT: &str = "chat_message";

const FEED_NAME: &str = "chat";

/// Result of a send request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the connection for delivery
    Sent,
    /// Empty or whitespace-only text; nothing was sent
    Skipped,
}

/// Chat feed connector: append-only log plus gated sends
pub struct ChatFeed {
    connection: ConnectionHandle,
    messages: watch::Receiver<Vec<ChatMessage>>,
    default_sender: String,
}

impl ChatFeed {
    pub fn activate(
        endpoint: &str,
        options: ConnectionOptions,
        config: &ChatFeedConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (messages_tx, messages) = watch::channel(Vec::new());

        let connection_config = ConnectionConfig::new(FEED_NAME, endpoint)
            .options(options)
            .on(CHAT_MESSAGE_EVENT, move |payload| {
                let message = ChatMessage::from_payload(&payload);
                debug!(sender = %message.sender, "Chat message received");
                messages_tx.send_modify(|log| log.push(message));
            });

        Self {
            connection: ConnectionHandle::activate(connection_config, transport),
            messages,
            default_sender: config.default_sender.clone(),
        }
    }

    /// Log in arrival order
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.borrow().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.borrow().len()
    }

    /// Receiver notified on every append
    pub fn watch(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages.clone()
    }

    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Send as the configured default sender
    pub fn send_message(&self, text: &str) -> Result<SendStatus, EmitError> {
        self.send_message_as(text, "")
    }

    /// Send `text` as `sender`; a blank sender falls back to the default.
    ///
    /// The log is not touched: the message appears once the server echoes it.
    pub fn send_message_as(&self, text: &str, sender: &str) -> Result<SendStatus, EmitError> {
        if text.trim().is_empty() {
            trace!("Ignoring empty chat message");
            return Ok(SendStatus::Skipped);
        }

        let sender = if sender.trim().is_empty() {
            self.default_sender.as_str()
        } else {
            sender
        };
        let payload = serde_json::to_value(OutgoingChat {
            message: text,
            sender,
        })?;

        self.connection
            .emit(Frame::new(CHAT_MESSAGE_EVENT, payload))?;
        Ok(SendStatus::Sent)
    }

    pub async fn deactivate(&mut self) {
        self.connection.deactivate().await;
    }
}
