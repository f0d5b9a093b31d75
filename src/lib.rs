// Library crate for the room broadcast server
// This file exposes the public API for integration tests

pub mod broker;
pub mod config;
pub mod message;
pub mod room;
pub mod server;
pub mod shared;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use broker::{Broker, BrokerError, InMemoryBroker, RedisBroker, TopicHandler};
pub use config::{Config, ConnectionSettings};
pub use room::{LifecycleError, RoomLifecycle, RoomLifecycleManager};
pub use shared::{AppError, AppState};
pub use websockets::{
    serve_connection, ConnectionHandle, ConnectionId, ConnectionRegistry,
    InMemoryConnectionRegistry, SocketWrapper,
};
