//! In-process map without replication.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use mraft::StateMachine;
use tokio::sync::{Mutex, broadcast, watch};

use crate::command::{Command, Entry, Response};
use crate::state::MapState;

use super::error::Result;
use super::{EVENT_BUFFER, EntryStream, MapEvent, MapWatch, VersionedMap, put_result, remove_result};

/// Single-process VersionedMap driving [`MapState`] directly.
///
/// Events are published while the state lock is held, so watchers observe
/// them in apply order.
pub struct LocalMap {
    state: Mutex<MapState>,
    events: broadcast::Sender<MapEvent>,
    // Always true: a local map never hands event publishing elsewhere
    serving: watch::Sender<bool>,
}

impl LocalMap {
    pub fn new() -> Self {
        Self::with_event_buffer(EVENT_BUFFER)
    }

    /// Create a map whose watchers lag after `capacity` unread events.
    pub fn with_event_buffer(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(MapState::default()),
            events,
            serving: watch::Sender::new(true),
        }
    }

    async fn apply(&self, cmd: Command) -> Response {
        let mut state = self.state.lock().await;
        let (response, events) = state.apply(cmd);
        for event in events {
            // No receivers is fine
            let _ = self.events.send(event);
        }
        response
    }
}

impl Default for LocalMap {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionedMap for LocalMap {
    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>, if_version: Option<u64>) -> Result<Entry> {
        let cmd = Command::Put {
            request_id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            value,
            if_version,
            timestamp: Utc::now().to_rfc3339(),
        };
        put_result(self.apply(cmd).await)
    }

    async fn remove(&self, key: &str, if_version: Option<u64>) -> Result<Entry> {
        let cmd = Command::Remove {
            request_id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            if_version,
        };
        remove_result(self.apply(cmd).await)
    }

    async fn entries(&self) -> Result<EntryStream> {
        let snapshot = self.state.lock().await.snapshot();
        Ok(stream::iter(snapshot.entries.into_iter().map(Ok)).boxed())
    }

    async fn watch(&self, replay: bool) -> Result<MapWatch> {
        let state = self.state.lock().await;
        let events = self.events.subscribe();
        let snapshot = state.snapshot();
        Ok(MapWatch {
            revision: snapshot.revision,
            replay: if replay { snapshot.entries } else { Vec::new() },
            events,
            serving: self.serving.subscribe(),
        })
    }

    fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapError, MapEventKind};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let map = LocalMap::new();
        let entry = map.put("device-a", b"one".to_vec(), None).await.unwrap();
        assert_eq!(entry.version, 1);

        let loaded = map.get("device-a").await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(map.get("device-zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guarded_put_errors() {
        let map = LocalMap::new();
        let entry = map.put("device-a", b"one".to_vec(), None).await.unwrap();
        map.put("device-a", b"two".to_vec(), Some(entry.version))
            .await
            .unwrap();

        let stale = map.put("device-a", b"three".to_vec(), Some(entry.version)).await;
        assert!(matches!(stale, Err(MapError::VersionMismatch { .. })));

        let missing = map.put("device-b", b"x".to_vec(), Some(1)).await;
        assert!(matches!(missing, Err(MapError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_only_put() {
        let map = LocalMap::new();
        map.put("device-a", b"one".to_vec(), Some(crate::map::ABSENT))
            .await
            .unwrap();

        let again = map.put("device-a", b"two".to_vec(), Some(crate::map::ABSENT)).await;
        assert!(matches!(again, Err(MapError::AlreadyExists(ref key)) if key == "device-a"));
        assert_eq!(map.get("device-a").await.unwrap().unwrap().value, b"one".to_vec());
    }

    #[tokio::test]
    async fn test_remove() {
        let map = LocalMap::new();
        let entry = map.put("device-a", b"one".to_vec(), None).await.unwrap();

        let removed = map.remove("device-a", Some(entry.version)).await.unwrap();
        assert_eq!(removed.value, b"one".to_vec());
        assert!(matches!(
            map.remove("device-a", None).await,
            Err(MapError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_single_pass() {
        let map = LocalMap::new();
        map.put("device-b", b"b".to_vec(), None).await.unwrap();
        map.put("device-a", b"a".to_vec(), None).await.unwrap();

        let keys: Vec<String> = map
            .entries()
            .await
            .unwrap()
            .map(|e| e.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["device-a", "device-b"]);
    }

    #[tokio::test]
    async fn test_watch_replay_then_live() {
        let map = LocalMap::new();
        map.put("device-a", b"a".to_vec(), None).await.unwrap();

        let mut watch = map.watch(true).await.unwrap();
        assert_eq!(watch.revision, 1);
        assert_eq!(watch.replay.len(), 1);
        assert_eq!(map.watcher_count(), 1);

        map.put("device-b", b"b".to_vec(), None).await.unwrap();
        let event = watch.events.recv().await.unwrap();
        assert_eq!(event.kind, MapEventKind::Inserted);
        assert_eq!(event.entry.key, "device-b");
        assert!(watch.is_live(&event));

        drop(watch);
        assert_eq!(map.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_without_replay() {
        let map = LocalMap::new();
        map.put("device-a", b"a".to_vec(), None).await.unwrap();

        let watch = map.watch(false).await.unwrap();
        assert!(watch.replay.is_empty());
        assert_eq!(watch.revision, 1);
    }
}
