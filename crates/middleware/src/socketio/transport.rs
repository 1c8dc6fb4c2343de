use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::socketio::codec::{self, Handshake, Packet, CONNECT, PONG};
use crate::transport::{Frame, Link, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

const CHANNEL_BUFFER_SIZE: usize = 256;

/// Default time allowed for the websocket upgrade plus the Socket.IO handshake
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Build the Engine.IO websocket URL for a server origin.
///
/// `http://host:5001` becomes `ws://host:5001/socket.io/?EIO=4&transport=websocket`.
/// An explicit path on the endpoint is kept.
pub fn websocket_url(endpoint: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid endpoint {}: {}", endpoint, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::ConnectionFailed(format!("cannot use scheme {}", scheme)))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

/// Socket.IO client transport over a single websocket
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    connect_timeout: Duration,
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketIoTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn open(&self, url: &Url) -> Result<(WsWrite, WsRead, Handshake), TransportError> {
        info!(url = %url, "Connecting to Socket.IO server");

        let (ws, response) = connect_async(url.as_str()).await?;
        debug!(status = ?response.status(), "WebSocket upgraded");

        let (mut write, mut read) = ws.split();

        let handshake = loop {
            match next_packet(&mut read).await? {
                Packet::Open(handshake) => break handshake,
                other => trace!(packet = ?other, "Ignoring packet before open"),
            }
        };

        write.send(Message::Text(CONNECT.to_string())).await?;

        loop {
            match next_packet(&mut read).await? {
                Packet::Connect => break,
                Packet::ConnectError(message) => return Err(TransportError::Handshake(message)),
                Packet::Ping => write.send(Message::Text(PONG.to_string())).await?,
                other => trace!(packet = ?other, "Ignoring packet before namespace connect"),
            }
        }

        info!(sid = %handshake.sid, "Socket.IO session established");
        Ok((write, read, handshake))
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
        let url = websocket_url(endpoint)?;

        let (write, read, handshake) = timeout(self.connect_timeout, self.open(&url))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        tokio::spawn(run_session(write, read, handshake, outbound_rx, inbound_tx));

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

/// Read the next text packet, answering websocket-level pings along the way
async fn next_packet(read: &mut WsRead) -> Result<Packet, TransportError> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return codec::decode(&text),
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "WebSocket closed during handshake");
                return Err(TransportError::Closed);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed),
        }
    }
}

/// Pump frames between the websocket and the link channels until either side ends
async fn run_session(
    mut write: WsWrite,
    mut read: WsRead,
    handshake: Handshake,
    mut outbound: mpsc::Receiver<Frame>,
    inbound: mpsc::Sender<Result<Frame, TransportError>>,
) {
    // The server pings every ping_interval; silence past interval + timeout means a dead peer
    let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + heartbeat;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(sid = %handshake.sid, "Link released, closing websocket");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match codec::encode_event(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, event = %frame.event, "Failed to encode event");
                        continue;
                    }
                };
                trace!(packet = %text, "Sending event");
                if let Err(e) = write.send(Message::Text(text)).await {
                    let _ = inbound.send(Err(e.into())).await;
                    break;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                        Ok(Packet::Event(frame)) => {
                            if inbound.send(Ok(frame)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Packet::Ping) => {
                            deadline = Instant::now() + heartbeat;
                            if let Err(e) = write.send(Message::Text(PONG.to_string())).await {
                                let _ = inbound.send(Err(e.into())).await;
                                break;
                            }
                        }
                        Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                            info!(sid = %handshake.sid, "Server closed the Socket.IO session");
                            break;
                        }
                        Ok(Packet::ConnectError(message)) => {
                            let _ = inbound.send(Err(TransportError::Handshake(message))).await;
                            break;
                        }
                        Ok(other) => trace!(packet = ?other, "Ignoring packet"),
                        Err(e) => warn!(error = %e, raw = %text, "Failed to decode packet"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = inbound.send(Err(e.into())).await;
                        break;
                    }
                    None => break,
                }
            }

            _ = sleep_until(deadline) => {
                warn!(
                    sid = %handshake.sid,
                    timeout_ms = heartbeat.as_millis() as u64,
                    "No ping from server, treating connection as dead"
                );
                let _ = inbound.send(Err(TransportError::Timeout)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_from_http_origin() {
        let url = websocket_url("http://localhost:5001").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_websocket_url_from_https_origin() {
        let url = websocket_url("https://transit.example.com").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://transit.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_websocket_url_keeps_custom_path() {
        let url = websocket_url("ws://localhost:5001/rt/socket.io/").unwrap();
        assert_eq!(url.path(), "/rt/socket.io/");
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        assert!(websocket_url("ftp://localhost").is_err());
        assert!(websocket_url("localhost:5001").is_err());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let transport = SocketIoTransport::new().with_connect_timeout(Duration::from_secs(2));
        let result = transport.connect("http://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
