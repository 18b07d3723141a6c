//! Versioned key/value map backing the device store.
//!
//! This module abstracts the replicated map the store persists into,
//! so the store only sees keys, opaque bytes and versions.
//!
//! # Architecture
//!
//! ```text
//! MapDeviceStore → Arc<dyn VersionedMap>
//!                        ↓
//!                  RaftMap   (mraft RaftNode<Command, Response, MapState>)
//!                  LocalMap  (in-process MapState, no replication)
//! ```
//!
//! Both implementations apply the same [`MapState`](crate::state::MapState)
//! state machine and publish its events on a broadcast channel.

mod error;
mod local_map;
mod raft_map;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{broadcast, watch};

use crate::command::{Entry, Response};

pub use crate::command::ABSENT;

pub use error::{MapError, Result};
pub use local_map::LocalMap;
pub use raft_map::RaftMap;

/// Default capacity of the map event broadcast channel.
pub const EVENT_BUFFER: usize = 256;

/// Kind of mutation applied to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEventKind {
    Inserted,
    Updated,
    Removed,
}

/// Mutation emitted by the state machine after a command is applied.
#[derive(Debug, Clone)]
pub struct MapEvent {
    pub kind: MapEventKind,
    /// Map revision at which the mutation was applied
    pub revision: u64,
    /// Written entry, or the last stored entry for removals
    pub entry: Entry,
}

/// A watch registration: the replay set plus the live event receiver.
///
/// The receiver is subscribed before the snapshot is taken, so any live
/// event with `revision <= self.revision` is already part of `replay`
/// (or of the state it reflects) and must be skipped.
///
/// `serving` flips to `false` once this map stops publishing events (a
/// Raft leader stepping down); the watch is dead from then on.
pub struct MapWatch {
    pub revision: u64,
    pub replay: Vec<Entry>,
    pub events: broadcast::Receiver<MapEvent>,
    pub serving: watch::Receiver<bool>,
}

impl MapWatch {
    /// Whether a live event happened after the snapshot.
    pub fn is_live(&self, event: &MapEvent) -> bool {
        event.revision > self.revision
    }
}

/// Resolve once `serving` reports that events are no longer published, or
/// once the map holding the sender is gone.
pub async fn stopped_serving(serving: &mut watch::Receiver<bool>) {
    let _ = serving.wait_for(|serving| !*serving).await;
}

/// Stream of map entries.
pub type EntryStream = BoxStream<'static, Result<Entry>>;

/// Linearizable versioned map.
#[async_trait]
pub trait VersionedMap: Send + Sync {
    /// Get the entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// Write `value` under `key`, guarded by `if_version` when set.
    ///
    /// `Some(ABSENT)` creates the key and fails with
    /// [`MapError::AlreadyExists`] if it is present.
    async fn put(&self, key: &str, value: Vec<u8>, if_version: Option<u64>) -> Result<Entry>;

    /// Remove `key`, guarded by `if_version` when set. Returns the removed entry.
    async fn remove(&self, key: &str, if_version: Option<u64>) -> Result<Entry>;

    /// Enumerate the current entries once.
    async fn entries(&self) -> Result<EntryStream>;

    /// Subscribe to changes, optionally with a replay of the current entries.
    async fn watch(&self, replay: bool) -> Result<MapWatch>;

    /// Number of live watch receivers.
    fn watcher_count(&self) -> usize;
}

/// Translate a state machine response for a put.
pub(crate) fn put_result(response: Response) -> Result<Entry> {
    match response {
        Response::Entry(entry) => Ok(entry),
        other => Err(error_from(other)),
    }
}

/// Translate a state machine response for a remove.
pub(crate) fn remove_result(response: Response) -> Result<Entry> {
    match response {
        Response::Removed(entry) => Ok(entry),
        other => Err(error_from(other)),
    }
}

fn error_from(response: Response) -> MapError {
    match response {
        Response::AlreadyExists { key } => MapError::AlreadyExists(key),
        Response::VersionMismatch {
            key,
            expected,
            actual,
        } => MapError::VersionMismatch {
            key,
            expected,
            actual,
        },
        Response::Error { code: 404, message } => MapError::NotFound(message),
        Response::Error { message, .. } => MapError::Internal(message),
        _ => MapError::Internal("unexpected response".into()),
    }
}
