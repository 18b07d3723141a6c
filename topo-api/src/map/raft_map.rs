//! RaftMap implementation - bridges VersionedMap to RaftNode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use mraft::RaftNode;
use tokio::sync::{RwLock, broadcast, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::command::{Command, Entry, Response};
use crate::state::MapState;

use super::error::{MapError, Result};
use super::{EntryStream, MapEvent, MapWatch, VersionedMap, put_result, remove_result};

type Node = RaftNode<Command, Response, MapState>;

/// How often the leadership monitor polls the node.
pub const LEADERSHIP_POLL: Duration = Duration::from_millis(250);

/// RaftMap wraps a RaftNode and implements the VersionedMap trait.
///
/// Writes are replicated through Raft; reads are served from the local copy
/// of the state machine. Map events are only emitted on the node that applies
/// commands as leader, so watches are refused on followers, and open watches
/// are ended when this node steps down.
pub struct RaftMap {
    node: Arc<RwLock<Node>>,
    events: broadcast::Sender<MapEvent>,
    leader: Arc<watch::Sender<bool>>,
    _monitor: DropGuard,
}

impl RaftMap {
    /// Create a new RaftMap wrapping the given RaftNode.
    ///
    /// `events` must be the sender wired into the node's event sink. Must be
    /// called from within a tokio runtime.
    pub fn new(node: Arc<RwLock<Node>>, events: broadcast::Sender<MapEvent>) -> Self {
        Self::with_poll_interval(node, events, LEADERSHIP_POLL)
    }

    /// Create a RaftMap whose leadership monitor polls every `interval`.
    pub fn with_poll_interval(
        node: Arc<RwLock<Node>>,
        events: broadcast::Sender<MapEvent>,
        interval: Duration,
    ) -> Self {
        let leader = Arc::new(watch::Sender::new(false));
        let cancel = CancellationToken::new();
        tokio::spawn(monitor_leadership(
            node.clone(),
            leader.clone(),
            interval,
            cancel.clone(),
        ));

        Self {
            node,
            events,
            leader,
            _monitor: cancel.drop_guard(),
        }
    }

    /// Get the event sender (for wiring up to the state machine).
    pub fn event_sender(&self) -> broadcast::Sender<MapEvent> {
        self.events.clone()
    }

    /// Execute a write command through Raft.
    async fn write_command(&self, cmd: Command) -> Result<Response> {
        let node = self.node.read().await;
        node.write_or_forward(cmd)
            .await
            .map_err(|e| MapError::Unavailable(e.to_string()))
    }
}

/// Publish leadership changes of `node` until cancelled.
async fn monitor_leadership(
    node: Arc<RwLock<Node>>,
    leader: Arc<watch::Sender<bool>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let is_leader = node.read().await.is_leader();
        leader.send_if_modified(|current| {
            if *current == is_leader {
                return false;
            }
            if is_leader {
                tracing::info!("Serving map events as leader");
            } else {
                tracing::warn!("Lost leadership, closing map watches");
            }
            *current = is_leader;
            true
        });
    }
}

#[async_trait]
impl VersionedMap for RaftMap {
    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let node = self.node.read().await;
        let state = node.get_state().await;
        Ok(state.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>, if_version: Option<u64>) -> Result<Entry> {
        let cmd = Command::Put {
            request_id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            value,
            if_version,
            timestamp: Utc::now().to_rfc3339(),
        };

        put_result(self.write_command(cmd).await?)
    }

    async fn remove(&self, key: &str, if_version: Option<u64>) -> Result<Entry> {
        let cmd = Command::Remove {
            request_id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            if_version,
        };

        remove_result(self.write_command(cmd).await?)
    }

    async fn entries(&self) -> Result<EntryStream> {
        let node = self.node.read().await;
        let state = node.get_state().await;
        let snapshot = state.snapshot();
        Ok(stream::iter(snapshot.entries.into_iter().map(Ok)).boxed())
    }

    async fn watch(&self, replay: bool) -> Result<MapWatch> {
        // Subscribe before reading state so nothing applied in between is lost
        let events = self.events.subscribe();
        let node = self.node.read().await;

        if !node.is_leader() {
            return Err(MapError::Unavailable(format!(
                "node {} is not the leader (leader: {:?}), watch there",
                node.id(),
                node.current_leader()
            )));
        }
        // The monitor may not have caught up with a fresh election yet
        self.leader.send_if_modified(|current| !std::mem::replace(current, true));
        let serving = self.leader.subscribe();

        let state = node.get_state().await;
        let snapshot = state.snapshot();

        tracing::debug!(
            "Map watch registered at revision {} ({} entries, replay: {})",
            snapshot.revision,
            snapshot.entries.len(),
            replay
        );

        Ok(MapWatch {
            revision: snapshot.revision,
            replay: if replay { snapshot.entries } else { Vec::new() },
            events,
            serving,
        })
    }

    fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }
}
