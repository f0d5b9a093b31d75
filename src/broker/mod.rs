// Broker bridge
//
// The core only needs two things from a message broker: fanout publish to a
// topic, and an ephemeral subscription that runs until cancelled.

// Public API - what other modules can use
pub use bridge::{Broker, BrokerError, TopicHandler};
pub use in_memory::InMemoryBroker;
pub use redis_pubsub::RedisBroker;

// Internal modules
mod bridge;
mod in_memory;
mod redis_pubsub;
