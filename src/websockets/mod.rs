// Public API
pub use connection_registry::{
    BroadcastError, ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryFailure,
    InMemoryConnectionRegistry, SendError,
};
pub use handler::{serve_connection, websocket_handler};
pub use socket::{Connection, InboundFrame, SocketError, SocketWrapper};

// Internal modules
mod connection_registry;
mod handler;
mod socket;
