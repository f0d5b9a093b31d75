//! Mock collaborators with call accounting
#![allow(dead_code)] // Test utilities may not all be used in every test

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use roomcast::{
    room::{LifecycleError, RoomLifecycle, RoomLifecycleManager, RoomStatus},
    websockets::{
        BroadcastError, ConnectionHandle, ConnectionId, ConnectionRegistry, InboundFrame,
        InMemoryConnectionRegistry, SocketError, SocketWrapper,
    },
    Broker, BrokerError, InMemoryBroker, TopicHandler,
};

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TopicCalls {
    pub subscribes: usize,
    pub unsubscribes: usize,
}

/// In-memory broker that records every subscribe and teardown per topic
#[derive(Clone)]
pub struct MockBroker {
    inner: InMemoryBroker,
    calls: Arc<Mutex<HashMap<String, TopicCalls>>>,
    consumers: Arc<Mutex<HashMap<String, CancellationToken>>>,
    subscribe_delay: Duration,
    fail_subscribe: Arc<AtomicBool>,
    stuck_teardown: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBroker::new(),
            calls: Arc::new(Mutex::new(HashMap::new())),
            consumers: Arc::new(Mutex::new(HashMap::new())),
            subscribe_delay: Duration::ZERO,
            fail_subscribe: Arc::new(AtomicBool::new(false)),
            stuck_teardown: false,
        }
    }

    /// Holds every subscribe open for `delay`, widening race windows
    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Consumers never finish once cancelled, as if stuck mid-delivery
    pub fn with_stuck_teardown(mut self) -> Self {
        self.stuck_teardown = true;
        self
    }

    /// Ends the live consumer for `topic` without cancelling the room, the
    /// way a dropped broker connection would
    pub async fn drop_consumer(&self, topic: &str) {
        if let Some(kill) = self.consumers.lock().await.remove(topic) {
            kill.cancel();
        }
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub async fn calls_for(&self, topic: &str) -> TopicCalls {
        self.calls
            .lock()
            .await
            .get(topic)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BrokerError> {
        self.calls
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .subscribes += 1;

        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }

        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "mock failure".to_string(),
            });
        }

        let consumer = self.inner.subscribe(topic, handler, cancel).await?;
        let kill = CancellationToken::new();
        self.consumers
            .lock()
            .await
            .insert(topic.to_string(), kill.clone());

        let calls = Arc::clone(&self.calls);
        let topic = topic.to_string();
        let stuck_teardown = self.stuck_teardown;

        Ok(tokio::spawn(async move {
            let abort = consumer.abort_handle();
            tokio::select! {
                _ = consumer => {}
                _ = kill.cancelled() => abort.abort(),
            }
            if stuck_teardown {
                std::future::pending::<()>().await;
            }
            calls.lock().await.entry(topic).or_default().unsubscribes += 1;
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Socket
// ============================================================================

/// Socket driven by a test through its controller
pub struct MockSocket {
    inbound: mpsc::UnboundedReceiver<Result<InboundFrame, SocketError>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

pub struct MockSocketController {
    inbound: mpsc::UnboundedSender<Result<InboundFrame, SocketError>>,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn pair() -> (Self, MockSocketController) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let stalled = Arc::new(AtomicBool::new(false));

        (
            Self {
                inbound: inbound_rx,
                outbound: outbound_tx,
                closed: Arc::clone(&closed),
                stalled: Arc::clone(&stalled),
            },
            MockSocketController {
                inbound: inbound_tx,
                outbound: outbound_rx,
                closed,
                stalled,
            },
        )
    }
}

#[async_trait]
impl SocketWrapper for MockSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(message)
            .map_err(|_| SocketError::SendFailed("peer gone".to_string()))
    }

    async fn receive_frame(&mut self) -> Result<InboundFrame, SocketError> {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => Ok(InboundFrame::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MockSocketController {
    pub fn send_text(&self, text: &str) {
        let _ = self.inbound.send(Ok(InboundFrame::Text(text.to_string())));
    }

    /// Graceful close from the client side
    pub fn close(&self) {
        let _ = self.inbound.send(Ok(InboundFrame::Closed));
    }

    /// Abrupt transport fault, e.g. the peer vanished mid-frame
    pub fn fault(&self) {
        let _ = self.inbound.send(Err(SocketError::ReceiveFailed(
            "connection closed prematurely".to_string(),
        )));
    }

    /// Next payload the server sent, if one arrives within `wait`
    pub async fn next_message(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stop reading: every later server write hangs
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn was_closed_by_server(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Registry / lifecycle wrappers
// ============================================================================

/// Connection registry that counts add/remove calls
pub struct CountingRegistry {
    inner: InMemoryConnectionRegistry,
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
}

impl CountingRegistry {
    pub fn new() -> Self {
        Self {
            inner: InMemoryConnectionRegistry::new(),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for CountingRegistry {
    async fn add(&self, room: &str, handle: ConnectionHandle) {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(room, handle).await;
    }

    async fn remove(&self, room: &str, connection_id: ConnectionId) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(room, connection_id).await;
    }

    async fn broadcast(&self, room: &str, payload: &str) -> Result<usize, BroadcastError> {
        self.inner.broadcast(room, payload).await
    }

    async fn connection_count(&self, room: &str) -> usize {
        self.inner.connection_count(room).await
    }

    async fn rooms(&self) -> Vec<String> {
        self.inner.rooms().await
    }
}

/// Room lifecycle that counts acquire/release calls
pub struct CountingLifecycle {
    inner: RoomLifecycleManager,
    pub acquires: AtomicUsize,
    pub acquires_completed: AtomicUsize,
    pub releases: AtomicUsize,
}

impl CountingLifecycle {
    pub fn new(inner: RoomLifecycleManager) -> Self {
        Self {
            inner,
            acquires: AtomicUsize::new(0),
            acquires_completed: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RoomLifecycle for CountingLifecycle {
    async fn acquire(&self, room: &str) -> Result<(), LifecycleError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.acquire(room).await;
        self.acquires_completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn release(&self, room: &str) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(room).await;
    }

    fn ref_count(&self, room: &str) -> usize {
        self.inner.ref_count(room)
    }

    fn active_rooms(&self) -> Vec<RoomStatus> {
        self.inner.active_rooms()
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
