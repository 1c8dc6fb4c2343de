//! transitedge-middleware: pluggable event transport
//!
//! Provides the `Transport` abstraction used by feed connections, a Socket.IO
//! websocket implementation, and an in-memory implementation for testing.

pub mod error;
pub mod memory;
pub mod socketio;
pub mod transport;

pub use error::TransportError;
pub use memory::{InMemoryTransport, MemoryServer, ServerSession};
pub use socketio::SocketIoTransport;
pub use transport::{Frame, Link, Transport};
