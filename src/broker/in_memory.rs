use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bridge::{Broker, BrokerError, TopicHandler};

const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Process-local fanout broker
///
/// Each topic is a `broadcast` channel that exists only while at least one
/// subscription is bound to it, like a fanout exchange with exclusive queues.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    /// topic -> sender
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Creates a broker whose per-topic buffer holds `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions bound to `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn release_topic(topics: &DashMap<String, broadcast::Sender<String>>, topic: &str) {
        if topics
            .remove_if(topic, |_, sender| sender.receiver_count() == 0)
            .is_some()
        {
            debug!(topic = %topic, "Released topic channel with no subscribers");
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let Some(sender) = self.topics.get(topic).map(|s| s.clone()) else {
            debug!(topic = %topic, "Published with no subscribers - message dropped");
            return Ok(());
        };

        match sender.send(payload.to_string()) {
            Ok(receivers) => {
                debug!(topic = %topic, receivers = receivers, "Message published");
            }
            Err(_) => {
                debug!(topic = %topic, "Published with no receivers - message dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BrokerError> {
        let mut receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let topics = Arc::clone(&self.topics);
        let topic = topic.to_string();
        let handler_name = handler.handler_name();

        info!(topic = %topic, handler = handler_name, "Topic subscription started");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    msg = receiver.recv() => match msg {
                        Ok(payload) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            handler.handle_message(&topic, payload).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                topic = %topic,
                                handler = handler_name,
                                skipped = skipped,
                                "Subscriber lagged behind, messages skipped"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }

            drop(receiver);
            Self::release_topic(&topics, &topic);

            info!(topic = %topic, handler = handler_name, "Topic subscription ended");
        }))
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
