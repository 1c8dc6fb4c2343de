use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{Frame, Link, Transport};

const CHANNEL_BUFFER_SIZE: usize = 1024;

struct Shared {
    accept_tx: mpsc::UnboundedSender<ServerSession>,
    refusing: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

/// Transport whose server side is driven by a [`MemoryServer`] in the same process.
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    /// Create a transport together with the server handle that accepts its sessions
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            accept_tx,
            refusing: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryServer { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
        self.shared.attempts.lock().await.push(Instant::now());

        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "{}: connection refused",
                endpoint
            )));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let session = ServerSession {
            endpoint: endpoint.to_string(),
            to_client: inbound_tx,
            from_client: outbound_rx,
        };

        self.shared
            .accept_tx
            .send(session)
            .map_err(|_| TransportError::ConnectionFailed("server is gone".to_string()))?;

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

/// Server side of an [`InMemoryTransport`]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<ServerSession>,
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Wait for the next client session
    pub async fn accept(&mut self) -> Option<ServerSession> {
        self.accept_rx.recv().await
    }

    /// Make subsequent connect attempts fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refusing.store(refuse, Ordering::SeqCst);
    }

    /// Times of every connect attempt, refused ones included
    pub async fn connect_attempts(&self) -> Vec<Instant> {
        self.shared.attempts.lock().await.clone()
    }
}

/// One accepted client session. Dropping it closes the connection.
pub struct ServerSession {
    endpoint: String,
    to_client: mpsc::Sender<Result<Frame, TransportError>>,
    from_client: mpsc::Receiver<Frame>,
}

impl ServerSession {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Push an event to the client. Returns false once the client has hung up.
    pub async fn push(&self, event: &str, payload: Value) -> bool {
        self.to_client
            .send(Ok(Frame::new(event, payload)))
            .await
            .is_ok()
    }

    /// Report a transport failure to the client and end the session
    pub async fn fail(self, error: TransportError) {
        let _ = self.to_client.send(Err(error)).await;
    }

    /// Next event emitted by the client, `None` once the client disconnected
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Event emitted by the client, if one is already waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client side has released the session
    pub fn is_client_gone(&self) -> bool {
        self.to_client.is_closed()
    }
}
