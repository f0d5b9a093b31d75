use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::forwarder::RoomForwarder;
use crate::broker::Broker;
use crate::websockets::ConnectionRegistry;

const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_millis(100);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Subscription for room '{room}' failed to start: {reason}")]
    StartFailed { room: String, reason: String },
}

/// Outcome of the subscription start, shared with every acquirer of a slot
#[derive(Debug, Clone, PartialEq)]
enum StartState {
    Starting,
    Running,
    Failed(String),
}

struct RoomSlot {
    refs: usize,
    generation: u64,
    cancel: CancellationToken,
    /// Supervisor of the broker consumer, set once the start succeeds
    task: Option<JoinHandle<()>>,
    started: watch::Receiver<StartState>,
    /// False while the consumer is down and being replaced
    subscribed: Arc<AtomicBool>,
    active_since: DateTime<Utc>,
}

/// Aborts the consumer if its supervisor is dropped, e.g. on a stop timeout
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Point-in-time view of one active room
#[derive(Debug, Clone, PartialEq)]
pub struct RoomStatus {
    pub room: String,
    pub ref_count: usize,
    pub subscribed: bool,
    pub active_since: DateTime<Utc>,
}

/// Decides per room whether a broker subscription should be running
#[async_trait]
pub trait RoomLifecycle: Send + Sync {
    /// Take a reference on `room`, starting its subscription on the 0 -> 1
    /// transition. Returns once the subscription is running.
    async fn acquire(&self, room: &str) -> Result<(), LifecycleError>;

    /// Drop a reference on `room`, stopping its subscription on 1 -> 0.
    /// Releasing a room without references is a no-op.
    async fn release(&self, room: &str);

    fn ref_count(&self, room: &str) -> usize;

    fn active_rooms(&self) -> Vec<RoomStatus>;

    /// Stop every subscription regardless of reference counts
    async fn shutdown(&self);
}

/// Reference-counted owner of per-room broker subscriptions
///
/// State lives in a concurrent map keyed by room, so rooms never contend with
/// each other. The first acquirer of a room wins the map entry and spawns the
/// start; later acquirers join the slot and wait for the start outcome.
#[derive(Clone)]
pub struct RoomLifecycleManager {
    slots: Arc<DashMap<String, RoomSlot>>,
    broker: Arc<dyn Broker>,
    registry: Arc<dyn ConnectionRegistry>,
    next_generation: Arc<AtomicU64>,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl RoomLifecycleManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn ConnectionRegistry>,
        start_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            broker,
            registry,
            next_generation: Arc::new(AtomicU64::new(0)),
            start_timeout,
            stop_timeout,
        }
    }

    async fn open_subscription(
        &self,
        room: &str,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<()>, String> {
        let forwarder = Arc::new(RoomForwarder::new(
            room.to_string(),
            Arc::clone(&self.registry),
            cancel.clone(),
        ));

        match timeout(
            self.start_timeout,
            self.broker.subscribe(room, forwarder, cancel.clone()),
        )
        .await
        {
            Ok(Ok(task)) => Ok(task),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.start_timeout)),
        }
    }

    /// Runs detached from the acquirer so a dropped request can never leave a
    /// slot stuck in `Starting`.
    async fn start_subscription(
        self,
        room: String,
        generation: u64,
        cancel: CancellationToken,
        subscribed: Arc<AtomicBool>,
        started: watch::Sender<StartState>,
    ) {
        match self.open_subscription(&room, &cancel).await {
            Ok(consumer) => {
                subscribed.store(true, Ordering::Release);
                let supervisor = tokio::spawn(self.clone().supervise(
                    room.clone(),
                    cancel.clone(),
                    subscribed,
                    consumer,
                ));

                let orphan = match self.slots.get_mut(&room) {
                    Some(mut slot) if slot.generation == generation => {
                        slot.task = Some(supervisor);
                        None
                    }
                    _ => Some(supervisor),
                };

                let _ = started.send(StartState::Running);

                match orphan {
                    None => {
                        info!(
                            room = %room,
                            broker = self.broker.name(),
                            "Room subscription active"
                        );
                    }
                    Some(task) => {
                        // Every reference was released while the broker was
                        // still setting up
                        warn!(room = %room, "Room released during start - stopping subscription");
                        cancel.cancel();
                        self.wait_for_stop(&room, task).await;
                    }
                }
            }
            Err(reason) => {
                cancel.cancel();
                self.slots
                    .remove_if(&room, |_, slot| slot.generation == generation);
                error!(
                    room = %room,
                    broker = self.broker.name(),
                    error = %reason,
                    "Room subscription failed to start"
                );
                let _ = started.send(StartState::Failed(reason));
            }
        }
    }

    /// Keeps a room's consumer alive until the room token is cancelled
    ///
    /// A consumer that ends on its own (lost broker connection, closed stream,
    /// panic) is replaced with a fresh subscription, retried with backoff.
    /// `subscribed` reads false for as long as the room has no consumer.
    async fn supervise(
        self,
        room: String,
        cancel: CancellationToken,
        subscribed: Arc<AtomicBool>,
        mut consumer: JoinHandle<()>,
    ) {
        loop {
            let guard = AbortOnDrop(consumer.abort_handle());
            let outcome = (&mut consumer).await;
            drop(guard);

            if cancel.is_cancelled() {
                return;
            }

            subscribed.store(false, Ordering::Release);
            match outcome {
                Ok(()) => {
                    error!(room = %room, "Room subscription ended unexpectedly - resubscribing");
                }
                Err(e) => {
                    error!(room = %room, error = %e, "Room subscription task failed - resubscribing");
                }
            }

            let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
            consumer = loop {
                match self.open_subscription(&room, &cancel).await {
                    Ok(task) => break task,
                    Err(reason) => {
                        warn!(
                            room = %room,
                            error = %reason,
                            retry_in_ms = backoff.as_millis() as u64,
                            "Resubscribe failed"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
                    }
                }
            };

            subscribed.store(true, Ordering::Release);
            info!(room = %room, "Room subscription restored");
        }
    }

    async fn await_start(
        &self,
        room: &str,
        generation: u64,
        mut started: watch::Receiver<StartState>,
    ) -> Result<(), LifecycleError> {
        let state = started
            .wait_for(|state| *state != StartState::Starting)
            .await
            .map(|state| (*state).clone());

        match state {
            Ok(StartState::Running) => Ok(()),
            Ok(StartState::Failed(reason)) => Err(LifecycleError::StartFailed {
                room: room.to_string(),
                reason,
            }),
            Ok(StartState::Starting) | Err(_) => {
                // The start task went away without reporting
                if let Some((_, slot)) = self
                    .slots
                    .remove_if(room, |_, slot| slot.generation == generation)
                {
                    slot.cancel.cancel();
                }
                Err(LifecycleError::StartFailed {
                    room: room.to_string(),
                    reason: "start task ended without an outcome".to_string(),
                })
            }
        }
    }

    async fn wait_for_stop(&self, room: &str, task: JoinHandle<()>) {
        let abort = task.abort_handle();
        match timeout(self.stop_timeout, task).await {
            Ok(Ok(())) => {
                debug!(room = %room, "Subscription task finished");
            }
            Ok(Err(e)) => {
                warn!(room = %room, error = %e, "Subscription task ended abnormally");
            }
            Err(_) => {
                warn!(
                    room = %room,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Subscription task did not stop in time - aborting"
                );
                abort.abort();
            }
        }
    }

    async fn stop_slot(&self, room: &str, slot: RoomSlot) {
        slot.cancel.cancel();
        if let Some(task) = slot.task {
            self.wait_for_stop(room, task).await;
        }
        info!(room = %room, "Room subscription stopped");
    }
}

#[async_trait]
impl RoomLifecycle for RoomLifecycleManager {
    async fn acquire(&self, room: &str) -> Result<(), LifecycleError> {
        let (generation, started, start) = match self.slots.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.refs += 1;
                debug!(room = %room, refs = slot.refs, "Joined active room");
                (slot.generation, slot.started.clone(), None)
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                let (sender, receiver) = watch::channel(StartState::Starting);
                let subscribed = Arc::new(AtomicBool::new(false));

                entry.insert(RoomSlot {
                    refs: 1,
                    generation,
                    cancel: cancel.clone(),
                    task: None,
                    started: receiver.clone(),
                    subscribed: Arc::clone(&subscribed),
                    active_since: Utc::now(),
                });

                (generation, receiver, Some((cancel, subscribed, sender)))
            }
        };

        if let Some((cancel, subscribed, sender)) = start {
            info!(room = %room, "First reference - starting room subscription");
            tokio::spawn(self.clone().start_subscription(
                room.to_string(),
                generation,
                cancel,
                subscribed,
                sender,
            ));
        }

        self.await_start(room, generation, started).await
    }

    async fn release(&self, room: &str) {
        let removed = match self.slots.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.refs = slot.refs.saturating_sub(1);
                if slot.refs == 0 {
                    Some(entry.remove())
                } else {
                    debug!(room = %room, refs = slot.refs, "Left active room");
                    None
                }
            }
            Entry::Vacant(_) => {
                warn!(room = %room, "Release for room with no references - ignoring");
                None
            }
        };

        if let Some(slot) = removed {
            info!(room = %room, "Last reference released - stopping room subscription");
            self.stop_slot(room, slot).await;
        }
    }

    fn ref_count(&self, room: &str) -> usize {
        self.slots.get(room).map(|slot| slot.refs).unwrap_or(0)
    }

    fn active_rooms(&self) -> Vec<RoomStatus> {
        self.slots
            .iter()
            .map(|entry| RoomStatus {
                room: entry.key().clone(),
                ref_count: entry.refs,
                subscribed: entry.subscribed.load(Ordering::Acquire),
                active_since: entry.active_since,
            })
            .collect()
    }

    async fn shutdown(&self) {
        let rooms: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let slots: Vec<(String, RoomSlot)> = rooms
            .into_iter()
            .filter_map(|room| self.slots.remove(&room))
            .collect();

        info!(rooms = slots.len(), "Stopping all room subscriptions");

        join_all(
            slots
                .into_iter()
                .map(|(room, slot)| async move { self.stop_slot(&room, slot).await }),
        )
        .await;
    }
}
