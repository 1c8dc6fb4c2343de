//! Socket.IO over Engine.IO v4 (websocket transport only)

pub mod codec;
mod transport;

pub use codec::{Handshake, Packet};
pub use transport::{websocket_url, SocketIoTransport};
