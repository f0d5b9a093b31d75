use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bridge::{Broker, BrokerError, TopicHandler};

/// Redis PUB/SUB backed broker
///
/// Publishing shares one multiplexed connection. Every subscription gets a
/// dedicated pub/sub connection, which is dropped when the subscription ends so
/// nothing stays bound on the server.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        info!(url = %url, "Connected to Redis broker");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic = %topic, receivers = receivers, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BrokerError> {
        let subscribe_error = |e: redis::RedisError| BrokerError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        };

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(subscribe_error)?;
        pubsub.subscribe(topic).await.map_err(subscribe_error)?;

        let topic = topic.to_string();
        let handler_name = handler.handler_name();

        info!(topic = %topic, handler = handler_name, "Topic subscription started");

        Ok(tokio::spawn(async move {
            {
                let mut messages = Box::pin(pubsub.on_message());

                loop {
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => break,

                        msg = messages.next() => {
                            let Some(msg) = msg else {
                                warn!(topic = %topic, "Redis subscription stream ended");
                                break;
                            };
                            if cancel.is_cancelled() {
                                break;
                            }
                            match msg.get_payload::<String>() {
                                Ok(payload) => handler.handle_message(&topic, payload).await,
                                Err(e) => {
                                    warn!(
                                        topic = %topic,
                                        error = %e,
                                        "Dropping message with non-text payload"
                                    );
                                }
                            }
                        }
                    }
                }
            }

            if let Err(e) = pubsub.unsubscribe(topic.as_str()).await {
                debug!(topic = %topic, error = %e, "Unsubscribe failed, dropping connection");
            }

            info!(topic = %topic, handler = handler_name, "Topic subscription ended");
        }))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
