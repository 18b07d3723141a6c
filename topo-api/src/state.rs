//! Replicated map state machine.

use lru::LruCache;
use mraft::StateMachine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::command::{ABSENT, Command, Entry, Response};
use crate::map::{MapEvent, MapEventKind};

const IDEMPOTENCY_CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(1000).unwrap();

/// Versioned key/value state - replicated across all nodes via Raft.
///
/// Every applied write advances `revision` by one and stamps the written
/// entry with it, so versions strictly increase per key and zero is never
/// handed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapState {
    pub entries: HashMap<String, Entry>,
    pub revision: u64,
    /// Idempotency cache for request deduplication
    #[serde(skip)]
    applied_requests: Option<LruCache<String, Response>>,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            revision: 0,
            applied_requests: Some(LruCache::new(IDEMPOTENCY_CACHE_SIZE)),
        }
    }
}

/// Point-in-time copy of the map together with the revision it reflects.
#[derive(Debug, Clone, Default)]
pub struct MapSnapshot {
    pub revision: u64,
    pub entries: Vec<Entry>,
}

impl MapState {
    /// Get an entry by key
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy all entries, ordered by key.
    pub fn snapshot(&self) -> MapSnapshot {
        let mut entries: Vec<Entry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        MapSnapshot {
            revision: self.revision,
            entries,
        }
    }

    /// Ensure the idempotency cache is initialized (after deserialization)
    fn ensure_cache(&mut self) {
        if self.applied_requests.is_none() {
            self.applied_requests = Some(LruCache::new(IDEMPOTENCY_CACHE_SIZE));
        }
    }

    fn not_found(key: &str) -> (Response, Vec<MapEvent>) {
        (
            Response::Error {
                code: 404,
                message: format!("Key '{}' not found", key),
            },
            vec![],
        )
    }
}

impl StateMachine<Command, Response> for MapState {
    type Event = MapEvent;

    fn apply(&mut self, cmd: Command) -> (Response, Vec<Self::Event>) {
        self.ensure_cache();

        // Check idempotency cache
        if let Some(cache) = &self.applied_requests
            && let Some(response) = cache.peek(cmd.request_id())
        {
            return (response.clone(), vec![]);
        }

        let (response, events) = match cmd.clone() {
            Command::Put {
                key,
                value,
                if_version,
                timestamp,
                ..
            } => {
                let existing = self
                    .entries
                    .get(&key)
                    .map(|e| (e.version, e.created_at.clone()));
                if let Some(expected) = if_version {
                    match &existing {
                        None if expected == ABSENT => {}
                        None => return Self::not_found(&key),
                        Some(_) if expected == ABSENT => {
                            return (Response::AlreadyExists { key }, vec![]);
                        }
                        Some((actual, _)) if *actual != expected => {
                            return (
                                Response::VersionMismatch {
                                    key,
                                    expected,
                                    actual: *actual,
                                },
                                vec![],
                            );
                        }
                        Some(_) => {}
                    }
                }

                self.revision += 1;
                let (kind, created_at) = match existing {
                    Some((_, created_at)) => (MapEventKind::Updated, created_at),
                    None => (MapEventKind::Inserted, timestamp.clone()),
                };
                let entry = Entry {
                    key: key.clone(),
                    value,
                    version: self.revision,
                    created_at,
                    updated_at: timestamp,
                };
                self.entries.insert(key, entry.clone());
                (
                    Response::Entry(entry.clone()),
                    vec![MapEvent {
                        kind,
                        revision: self.revision,
                        entry,
                    }],
                )
            }

            Command::Remove {
                key, if_version, ..
            } => {
                let Some(existing) = self.entries.get(&key) else {
                    return Self::not_found(&key);
                };
                if let Some(expected) = if_version
                    && existing.version != expected
                {
                    return (
                        Response::VersionMismatch {
                            key,
                            expected,
                            actual: existing.version,
                        },
                        vec![],
                    );
                }

                self.revision += 1;
                match self.entries.remove(&key) {
                    Some(entry) => (
                        Response::Removed(entry.clone()),
                        vec![MapEvent {
                            kind: MapEventKind::Removed,
                            revision: self.revision,
                            entry,
                        }],
                    ),
                    None => Self::not_found(&key),
                }
            }
        };

        // Cache the response
        if let Some(cache) = &mut self.applied_requests {
            cache.put(cmd.request_id().to_string(), response.clone());
        }

        (response, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mraft::StateMachine;

    /// Helper to get just the response from apply (ignoring events)
    fn apply(state: &mut MapState, cmd: Command) -> Response {
        let (response, _events) = state.apply(cmd);
        response
    }

    fn put_cmd(request_id: &str, key: &str, value: &str, if_version: Option<u64>) -> Command {
        Command::Put {
            request_id: request_id.to_string(),
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            if_version,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn remove_cmd(request_id: &str, key: &str, if_version: Option<u64>) -> Command {
        Command::Remove {
            request_id: request_id.to_string(),
            key: key.to_string(),
            if_version,
        }
    }

    fn expect_entry(response: Response) -> Entry {
        match response {
            Response::Entry(entry) => entry,
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_put_assigns_version() {
        let mut state = MapState::default();
        let (response, events) = state.apply(put_cmd("req-1", "device-a", "a", None));

        let entry = expect_entry(response);
        assert_eq!(entry.key, "device-a");
        assert_eq!(entry.value, b"a".to_vec());
        assert_eq!(entry.version, 1);
        assert_eq!(state.revision, 1);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MapEventKind::Inserted);
        assert_eq!(events[0].revision, 1);
    }

    #[test]
    fn test_versions_strictly_increase_per_key() {
        let mut state = MapState::default();
        let v1 = expect_entry(apply(&mut state, put_cmd("req-1", "device-a", "a", None))).version;
        apply(&mut state, put_cmd("req-2", "device-b", "b", None));
        let v2 = expect_entry(apply(&mut state, put_cmd("req-3", "device-a", "a2", Some(v1)))).version;

        assert!(v2 > v1);
        assert_eq!(state.get("device-a").unwrap().version, v2);
    }

    #[test]
    fn test_update_keeps_created_at() {
        let mut state = MapState::default();
        let first = expect_entry(apply(&mut state, put_cmd("req-1", "device-a", "a", None)));

        let (response, events) = state.apply(Command::Put {
            request_id: "req-2".to_string(),
            key: "device-a".to_string(),
            value: b"b".to_vec(),
            if_version: Some(first.version),
            timestamp: "2024-06-01T00:00:00Z".to_string(),
        });
        let second = expect_entry(response);

        assert_eq!(second.created_at, "2024-01-01T00:00:00Z");
        assert_eq!(second.updated_at, "2024-06-01T00:00:00Z");
        assert_eq!(events[0].kind, MapEventKind::Updated);
    }

    #[test]
    fn test_put_version_mismatch() {
        let mut state = MapState::default();
        let entry = expect_entry(apply(&mut state, put_cmd("req-1", "device-a", "a", None)));
        apply(&mut state, put_cmd("req-2", "device-a", "b", Some(entry.version)));

        let (response, events) = state.apply(put_cmd("req-3", "device-a", "c", Some(entry.version)));
        match response {
            Response::VersionMismatch {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "device-a");
                assert_eq!(expected, entry.version);
                assert!(actual > expected);
            }
            other => panic!("Expected version mismatch, got: {:?}", other),
        }
        assert!(events.is_empty());
        assert_eq!(state.get("device-a").unwrap().value, b"b".to_vec());
    }

    #[test]
    fn test_guarded_put_on_missing_key() {
        let mut state = MapState::default();
        let response = apply(&mut state, put_cmd("req-1", "device-a", "a", Some(3)));

        match response {
            Response::Error { code, message } => {
                assert_eq!(code, 404);
                assert!(message.contains("device-a"));
            }
            other => panic!("Expected error, got: {:?}", other),
        }
        assert!(state.is_empty());
        assert_eq!(state.revision, 0);
    }

    #[test]
    fn test_create_only_put() {
        let mut state = MapState::default();
        let (response, events) = state.apply(put_cmd("req-1", "device-a", "a", Some(ABSENT)));
        let entry = expect_entry(response);
        assert_eq!(entry.version, 1);
        assert_eq!(events[0].kind, MapEventKind::Inserted);

        let (response, events) = state.apply(put_cmd("req-2", "device-a", "b", Some(ABSENT)));
        match response {
            Response::AlreadyExists { key } => assert_eq!(key, "device-a"),
            other => panic!("Expected already exists, got: {:?}", other),
        }
        assert!(events.is_empty());
        assert_eq!(state.get("device-a").unwrap().value, b"a".to_vec());
        assert_eq!(state.revision, 1);
    }

    #[test]
    fn test_remove_unconditional() {
        let mut state = MapState::default();
        apply(&mut state, put_cmd("req-1", "device-a", "a", None));

        let (response, events) = state.apply(remove_cmd("req-2", "device-a", None));
        assert!(matches!(response, Response::Removed(ref e) if e.key == "device-a"));
        assert_eq!(events[0].kind, MapEventKind::Removed);
        assert_eq!(events[0].revision, 2);
        // Removed event carries the last stored version
        assert_eq!(events[0].entry.version, 1);
        assert!(state.get("device-a").is_none());
    }

    #[test]
    fn test_remove_guarded_mismatch_and_missing_are_distinct() {
        let mut state = MapState::default();
        let entry = expect_entry(apply(&mut state, put_cmd("req-1", "device-a", "a", None)));

        let mismatch = apply(&mut state, remove_cmd("req-2", "device-a", Some(entry.version + 7)));
        assert!(matches!(mismatch, Response::VersionMismatch { .. }));
        assert!(state.get("device-a").is_some());

        let missing = apply(&mut state, remove_cmd("req-3", "device-zz", Some(1)));
        assert!(matches!(missing, Response::Error { code: 404, .. }));
    }

    #[test]
    fn test_key_reuse_after_remove() {
        let mut state = MapState::default();
        let first = expect_entry(apply(&mut state, put_cmd("req-1", "device-a", "a", None)));
        apply(&mut state, remove_cmd("req-2", "device-a", Some(first.version)));

        let (response, events) = state.apply(put_cmd("req-3", "device-a", "fresh", None));
        let second = expect_entry(response);
        assert!(second.version > first.version);
        assert_eq!(events[0].kind, MapEventKind::Inserted);
    }

    #[test]
    fn test_idempotency_same_request_id() {
        let mut state = MapState::default();

        let first = expect_entry(apply(&mut state, put_cmd("req-same", "device-a", "a", None)));
        // Same request_id should return cached response without another write
        let (response, events) = state.apply(put_cmd("req-same", "device-a", "b", None));
        let second = expect_entry(response);

        assert_eq!(first, second);
        assert!(events.is_empty());
        assert_eq!(state.revision, 1);
    }

    #[test]
    fn test_snapshot_sorted_with_revision() {
        let mut state = MapState::default();
        apply(&mut state, put_cmd("req-1", "device-c", "c", None));
        apply(&mut state, put_cmd("req-2", "device-a", "a", None));
        apply(&mut state, put_cmd("req-3", "device-b", "b", None));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.revision, 3);
        let keys: Vec<&str> = snapshot.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["device-a", "device-b", "device-c"]);
    }

    #[test]
    fn test_cache_rebuilt_after_deserialize() {
        let mut state = MapState::default();
        apply(&mut state, put_cmd("req-1", "device-a", "a", None));

        let json = serde_json::to_string(&state).unwrap();
        let mut restored: MapState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.revision, 1);

        let entry = expect_entry(apply(&mut restored, put_cmd("req-2", "device-b", "b", None)));
        assert_eq!(entry.version, 2);
    }
}
