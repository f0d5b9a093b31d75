use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection_registry::ConnectionId;

/// Upper bound on the closing handshake with a peer that stopped reading
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What a single read from the client produced
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(usize),
    /// Ping/pong, answered by the transport
    Control,
    /// Close frame or end of stream
    Closed,
}

/// Simple WebSocket abstraction - all we care about is send/receive
#[async_trait]
pub trait SocketWrapper: Send {
    /// Send a text message to the client
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Receive the next frame from the client
    async fn receive_frame(&mut self) -> Result<InboundFrame, SocketError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), SocketError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SocketError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Direct implementation on axum's WebSocket
#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_frame(&mut self) -> Result<InboundFrame, SocketError> {
        match self.next().await {
            Some(Ok(Message::Text(text))) => Ok(InboundFrame::Text(text)),
            Some(Ok(Message::Binary(data))) => Ok(InboundFrame::Binary(data.len())),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Ok(InboundFrame::Control),
            Some(Ok(Message::Close(_))) => Ok(InboundFrame::Closed),
            Some(Err(e)) => Err(SocketError::ReceiveFailed(e.to_string())),
            None => Ok(InboundFrame::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// Connection represents a managed WebSocket connection
///
/// Clients only listen: the outbound receiver carries room broadcasts queued by
/// the connection registry, and anything the client sends is logged and dropped.
pub struct Connection {
    pub id: ConnectionId,
    pub room: String,
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::Receiver<String>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        room: String,
        socket: Box<dyn SocketWrapper>,
        outbound_receiver: mpsc::Receiver<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            room,
            socket,
            outbound_receiver,
            shutdown,
        }
    }

    /// Run the connection until the client leaves, the transport fails, or the
    /// server shuts down
    pub async fn run(mut self) -> Result<(), SocketError> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                // Handle outbound messages (from the room to the client)
                msg = self.outbound_receiver.recv() => {
                    match msg {
                        Some(message) => {
                            // A peer that stopped reading must not hold off shutdown
                            tokio::select! {
                                biased;
                                _ = self.shutdown.cancelled() => break,
                                sent = self.socket.send_message(message) => sent?,
                            }
                        }
                        None => break, // Unregistered, disconnect
                    }
                }

                // Handle inbound frames (from the client)
                frame = self.socket.receive_frame() => {
                    match frame? {
                        InboundFrame::Text(text) => {
                            debug!(
                                room = %self.room,
                                connection_id = %self.id,
                                bytes = text.len(),
                                "Ignoring inbound text frame"
                            );
                        }
                        InboundFrame::Binary(len) => {
                            debug!(
                                room = %self.room,
                                connection_id = %self.id,
                                bytes = len,
                                "Ignoring inbound binary frame"
                            );
                        }
                        InboundFrame::Control => {}
                        InboundFrame::Closed => break, // Client disconnected
                    }
                }
            }
        }

        // Clean disconnect
        if timeout(CLOSE_TIMEOUT, self.socket.close()).await.is_err() {
            debug!(
                room = %self.room,
                connection_id = %self.id,
                "Peer did not take the close frame in time"
            );
        }
        Ok(())
    }
}
