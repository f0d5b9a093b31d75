#![allow(dead_code)] // Test utilities may not all be used in every test

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use roomcast::{
    serve_connection, AppState, Broker, ConnectionSettings, RoomLifecycle, RoomLifecycleManager,
};

use super::mocks::{CountingLifecycle, CountingRegistry, MockBroker, MockSocket, MockSocketController};

pub const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub broker: Arc<MockBroker>,
    pub registry: Arc<CountingRegistry>,
    pub lifecycle: Arc<CountingLifecycle>,
    pub state: AppState,
}

pub struct TestSetupBuilder {
    broker: MockBroker,
    connection_settings: ConnectionSettings,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            broker: MockBroker::new(),
            connection_settings: ConnectionSettings::default(),
            start_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn with_broker(mut self, broker: MockBroker) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_connection_settings(mut self, settings: ConnectionSettings) -> Self {
        self.connection_settings = settings;
        self
    }

    pub fn build(self) -> TestSetup {
        let broker = Arc::new(self.broker);
        let registry = Arc::new(CountingRegistry::new());
        let lifecycle = Arc::new(CountingLifecycle::new(RoomLifecycleManager::new(
            broker.clone(),
            registry.clone(),
            self.start_timeout,
            self.stop_timeout,
        )));

        let state = AppState::new(
            broker.clone(),
            registry.clone(),
            lifecycle.clone(),
            self.connection_settings,
        );

        TestSetup {
            broker,
            registry,
            lifecycle,
            state,
        }
    }
}

impl TestSetup {
    /// Runs a connection for `room` the way an upgraded request would, and
    /// returns once the room reference has been taken
    pub async fn connect(&self, room: &str) -> (MockSocketController, JoinHandle<()>) {
        let before = self.lifecycle.acquires_completed.load(Ordering::SeqCst);
        let (socket, controller) = MockSocket::pair();

        let task = tokio::spawn(serve_connection(
            Box::new(socket),
            room.to_string(),
            self.state.clone(),
        ));

        let lifecycle = Arc::clone(&self.lifecycle);
        wait_until(move || {
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.acquires_completed.load(Ordering::SeqCst) > before }
        })
        .await;

        (controller, task)
    }

    pub async fn publish(&self, room: &str, message: &str) {
        self.state
            .broker
            .publish(room, message)
            .await
            .expect("publish should succeed");
    }

    pub fn ref_count(&self, room: &str) -> usize {
        self.lifecycle.ref_count(room)
    }
}

/// Polls `condition` until it holds, panicking after `WAIT`
pub async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {:?}",
            WAIT
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
