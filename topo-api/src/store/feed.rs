//! Change feed dispatcher.
//!
//! Turns the single map event stream into independent per-subscriber
//! streams. Every [`Subscription`] owns a forwarding task with its own
//! bounded channel, so a slow consumer only ever blocks itself:
//!
//! ```text
//! map broadcast ──┬─> forward task ─> mpsc ─> Subscription (CLI watch)
//!                 ├─> forward task ─> mpsc ─> Subscription (SSE client)
//!                 └─> forward task ─> mpsc ─> Subscription (...)
//! ```
//!
//! A subscription moves through `Init → Replaying → Live → Closed`. It is
//! closed when the consumer cancels or drops it, when the consumer's
//! receiver goes away, when the map stream fails, or when the map stops
//! publishing events (leadership lost). Closing drops the task's map
//! receiver, releasing the substrate subscription.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::Entry;
use crate::device::{DeviceEvent, EventType};
use crate::map::{MapEvent, MapEventKind, MapWatch, VersionedMap, stopped_serving};

use super::codec::decode_or_skip;
use super::error::{Result, StoreError};

/// Default per-subscriber channel capacity.
pub const SUBSCRIBER_BUFFER: usize = 64;

impl From<MapEventKind> for EventType {
    fn from(kind: MapEventKind) -> Self {
        match kind {
            MapEventKind::Inserted => EventType::Inserted,
            MapEventKind::Updated => EventType::Updated,
            MapEventKind::Removed => EventType::Removed,
        }
    }
}

/// Lifecycle of a subscription stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Init,
    Replaying,
    Live,
    Closed,
}

/// Fans the map's change stream out to subscribers.
#[derive(Clone)]
pub struct ChangeFeed {
    map: Arc<dyn VersionedMap>,
    active: Arc<AtomicUsize>,
    buffer: usize,
}

impl ChangeFeed {
    pub fn new(map: Arc<dyn VersionedMap>) -> Self {
        Self {
            map,
            active: Arc::new(AtomicUsize::new(0)),
            buffer: SUBSCRIBER_BUFFER,
        }
    }

    /// Set the per-subscriber channel capacity.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Number of subscriptions whose forwarding task is still running.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Open a subscription, replaying current state first when `replay` is set.
    pub async fn subscribe(&self, replay: bool) -> Result<Subscription> {
        let watch = self.map.watch(replay).await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let (phase_tx, phase_rx) = watch::channel(StreamPhase::Init);
        let cancel = CancellationToken::new();
        let guard = ActiveGuard::register(self.active.clone());

        tracing::debug!(
            "Opening subscription at revision {} ({} replay entries)",
            watch.revision,
            watch.replay.len()
        );
        let task = tokio::spawn(forward(watch, tx, phase_tx, cancel.clone(), guard));

        Ok(Subscription {
            events: rx,
            phase: phase_rx,
            cancel,
            task: Some(task),
        })
    }
}

/// Counts a running forwarding task for as long as it is alive.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn register(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One subscriber's view of the change feed.
///
/// Dropping the subscription cancels its forwarding task; use
/// [`Subscription::cancel`] to also wait for the task to finish.
pub struct Subscription {
    events: mpsc::Receiver<Result<DeviceEvent>>,
    phase: watch::Receiver<StreamPhase>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Receive the next event. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Result<DeviceEvent>> {
        self.events.recv().await
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> StreamPhase {
        *self.phase.borrow()
    }

    /// Observe phase transitions.
    pub fn phase_watch(&self) -> watch::Receiver<StreamPhase> {
        self.phase.clone()
    }

    /// Stop the subscription and wait until its task has released everything.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::warn!("Subscription task failed: {}", e);
        }
    }
}

impl Stream for Subscription {
    type Item = Result<DeviceEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward(
    watch: MapWatch,
    tx: mpsc::Sender<Result<DeviceEvent>>,
    phase: watch::Sender<StreamPhase>,
    cancel: CancellationToken,
    guard: ActiveGuard,
) {
    let MapWatch {
        revision,
        replay,
        events,
        mut serving,
    } = watch;

    phase.send_replace(StreamPhase::Replaying);
    if replay_entries(replay, &tx, &cancel).await {
        phase.send_replace(StreamPhase::Live);
        follow(revision, events, &mut serving, &tx, &cancel).await;
    }

    phase.send_replace(StreamPhase::Closed);
    tracing::debug!("Subscription closed");
    drop(guard);
}

/// Deliver the replay set. Returns false if the subscriber went away.
async fn replay_entries(
    replay: Vec<Entry>,
    tx: &mpsc::Sender<Result<DeviceEvent>>,
    cancel: &CancellationToken,
) -> bool {
    for entry in replay {
        let Some(device) = decode_or_skip(&entry) else {
            continue;
        };
        if !deliver(tx, cancel, Ok(DeviceEvent::replayed(device))).await {
            return false;
        }
    }
    true
}

/// Forward live map events newer than `revision` until the subscriber
/// leaves or the map stream ends. Consumes (and so releases) the receiver.
async fn follow(
    revision: u64,
    mut events: broadcast::Receiver<MapEvent>,
    serving: &mut watch::Receiver<bool>,
    tx: &mpsc::Sender<Result<DeviceEvent>>,
    cancel: &CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tx.closed() => return,
            _ = stopped_serving(serving) => {
                tracing::warn!("Map stopped publishing events, closing subscription");
                let error = StoreError::Unavailable("change stream moved to another node".into());
                deliver(tx, cancel, Err(error)).await;
                return;
            }
            received = events.recv() => received,
        };

        match received {
            // Already covered by the replay snapshot
            Ok(event) if event.revision <= revision => continue,
            Ok(event) => {
                let Some(device) = decode_or_skip(&event.entry) else {
                    continue;
                };
                let event = DeviceEvent {
                    event_type: event.kind.into(),
                    device,
                };
                if !deliver(tx, cancel, Ok(event)).await {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Subscriber lagged by {} events, closing", skipped);
                deliver(tx, cancel, Err(StoreError::Lagged(skipped))).await;
                return;
            }
            Err(RecvError::Closed) => {
                tracing::debug!("Map event stream closed");
                return;
            }
        }
    }
}

/// Send one item, giving up if the subscription is cancelled meanwhile.
async fn deliver(
    tx: &mpsc::Sender<Result<DeviceEvent>>,
    cancel: &CancellationToken,
    item: Result<DeviceEvent>,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}
