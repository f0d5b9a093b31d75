use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info};
use uuid::Uuid;

/// Per-connection unique id, freshly generated and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// A connection's send side as seen by the registry
///
/// The open flag is owned by whoever runs the socket; the registry only reads
/// it to skip connections that are on their way out.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    send_timeout: Duration,
}

impl ConnectionHandle {
    /// Creates a handle plus the receiving end of its outbound queue
    pub fn channel(
        id: ConnectionId,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            sender,
            open: Arc::new(AtomicBool::new(true)),
            send_timeout,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a payload for this connection, waiting at most the send timeout
    pub async fn send(&self, payload: String) -> Result<(), SendError> {
        self.sender
            .send_timeout(payload, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::Timeout(self.send_timeout),
                SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub connection_id: ConnectionId,
    pub error: SendError,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BroadcastError {
    #[error("delivered to {delivered} connection(s), {} failed", .failures.len())]
    Partial {
        delivered: usize,
        failures: Vec<DeliveryFailure>,
    },
}

/// Owns the room -> connections table and performs fanout writes
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Register a connection under a room, creating the room entry if needed.
    /// A duplicate id replaces the previous handle.
    async fn add(&self, room: &str, handle: ConnectionHandle);

    /// Remove a connection; empty rooms are dropped. Unknown ids are a no-op.
    async fn remove(&self, room: &str, connection_id: ConnectionId);

    /// Deliver `payload` to every open connection in `room`
    ///
    /// Sends are dispatched concurrently and fail independently. Returns the
    /// number of successful deliveries, or the aggregated failures.
    async fn broadcast(&self, room: &str, payload: &str) -> Result<usize, BroadcastError>;

    async fn connection_count(&self, room: &str) -> usize;

    /// Snapshot of rooms that currently have connections
    async fn rooms(&self) -> Vec<String>;
}

pub struct InMemoryConnectionRegistry {
    // room -> (connection id -> handle)
    rooms: DashMap<String, DashMap<ConnectionId, ConnectionHandle>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    fn open_handles(&self, room: &str) -> Vec<ConnectionHandle> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|entry| entry.value().is_open())
                    .map(|entry| entry.value().clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn add(&self, room: &str, handle: ConnectionHandle) {
        let connection_id = handle.id();
        let members = self.rooms.entry(room.to_string()).or_default();
        if members.insert(connection_id, handle).is_some() {
            debug!(room = %room, connection_id = %connection_id, "Replaced duplicate connection id");
        }
        info!(
            room = %room,
            connection_id = %connection_id,
            connections = members.len(),
            "Connection registered"
        );
    }

    async fn remove(&self, room: &str, connection_id: ConnectionId) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        let removed = members.remove(&connection_id);
        drop(members);

        if let Some((_, handle)) = removed {
            handle.close();
            info!(room = %room, connection_id = %connection_id, "Connection removed");
        }

        // Re-checked under the shard lock so a concurrent add is never dropped
        if self
            .rooms
            .remove_if(room, |_, members| members.is_empty())
            .is_some()
        {
            debug!(room = %room, "Room has no connections left - entry removed");
        }
    }

    async fn broadcast(&self, room: &str, payload: &str) -> Result<usize, BroadcastError> {
        let handles = self.open_handles(room);
        if handles.is_empty() {
            debug!(room = %room, "Broadcast to room with no open connections");
            return Ok(0);
        }

        let results = join_all(handles.iter().map(|handle| async move {
            handle
                .send(payload.to_string())
                .await
                .map_err(|error| DeliveryFailure {
                    connection_id: handle.id(),
                    error,
                })
        }))
        .await;

        let attempted = results.len();
        let failures: Vec<DeliveryFailure> = results.into_iter().filter_map(Result::err).collect();
        let delivered = attempted - failures.len();

        debug!(
            room = %room,
            delivered = delivered,
            failed = failures.len(),
            "Broadcast complete"
        );

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(BroadcastError::Partial {
                delivered,
                failures,
            })
        }
    }

    async fn connection_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    async fn rooms(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }
}
