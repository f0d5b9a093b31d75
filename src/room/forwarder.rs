use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::TopicHandler;
use crate::websockets::{BroadcastError, ConnectionRegistry};

/// Forwards every broker message for a room to that room's connections
pub struct RoomForwarder {
    room: String,
    registry: Arc<dyn ConnectionRegistry>,
    cancel: CancellationToken,
}

impl RoomForwarder {
    pub fn new(
        room: String,
        registry: Arc<dyn ConnectionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            room,
            registry,
            cancel,
        }
    }
}

#[async_trait]
impl TopicHandler for RoomForwarder {
    async fn handle_message(&self, _topic: &str, payload: String) {
        // Teardown has begun; nothing may be delivered past this point
        if self.cancel.is_cancelled() {
            debug!(room = %self.room, "Dropping message received after cancellation");
            return;
        }

        match self.registry.broadcast(&self.room, &payload).await {
            Ok(delivered) => {
                debug!(room = %self.room, delivered = delivered, "Message forwarded");
            }
            Err(BroadcastError::Partial {
                delivered,
                failures,
            }) => {
                for failure in &failures {
                    debug!(
                        room = %self.room,
                        connection_id = %failure.connection_id,
                        error = %failure.error,
                        "Delivery to connection failed"
                    );
                }
                warn!(
                    room = %self.room,
                    delivered = delivered,
                    failed = failures.len(),
                    "Message forwarded with delivery failures"
                );
            }
        }
    }

    fn handler_name(&self) -> &'static str {
        "RoomForwarder"
    }
}
