use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by broker publish/subscribe calls
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

/// Callback invoked once per message received on a subscribed topic
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle_message(&self, topic: &str, payload: String);

    /// Get a human-readable name for this handler (for logging/debugging)
    fn handler_name(&self) -> &'static str;
}

/// Publish/subscribe primitives consumed by the room lifecycle
///
/// Semantics are fanout: every live subscription of a topic sees every message
/// published after it was established. Nothing is persisted and nothing is
/// acknowledged.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fire-and-forget delivery to all current subscribers of `topic`
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Establish an ephemeral subscription bound to `topic`
    ///
    /// Returns once the broker side is set up; consumption runs on the returned
    /// task and calls `handler` per message until `cancel` fires, at which point
    /// the broker-side subscription is torn down and the task exits.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BrokerError>;

    fn name(&self) -> &'static str;
}
