//! Single-node Raft tests for the replicated map and the store above it.

mod common;

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use topo_api::map::{MapError, MapEventKind};
use topo_api::{
    Device, DeviceService, DeviceStore, EventType, MapDeviceStore, ServiceError, StoreError,
    VersionedMap,
};

#[tokio::test]
async fn test_raft_map_versions_and_cas() {
    let (map, node) = common::spawn_raft_map().await;

    let first = map.put("device-foo", b"one".to_vec(), None).await.unwrap();
    assert!(first.version > 0);

    let second = map
        .put("device-foo", b"two".to_vec(), Some(first.version))
        .await
        .unwrap();
    assert!(second.version > first.version);
    assert_eq!(second.created_at, first.created_at);

    let stale = map
        .put("device-foo", b"three".to_vec(), Some(first.version))
        .await;
    assert!(matches!(stale, Err(MapError::VersionMismatch { .. })));

    let loaded = map.get("device-foo").await.unwrap().unwrap();
    assert_eq!(loaded.value, b"two".to_vec());

    let removed = map.remove("device-foo", Some(second.version)).await.unwrap();
    assert_eq!(removed.value, b"two".to_vec());
    assert!(map.get("device-foo").await.unwrap().is_none());
    assert!(matches!(
        map.remove("device-foo", None).await,
        Err(MapError::NotFound(_))
    ));

    let _ = node.write().await.shutdown().await;
}

#[tokio::test]
async fn test_raft_map_watch() {
    let (map, node) = common::spawn_raft_map().await;
    map.put("device-a", b"a".to_vec(), None).await.unwrap();

    let mut watch = map.watch(true).await.unwrap();
    assert_eq!(watch.replay.len(), 1);
    assert_eq!(map.watcher_count(), 1);

    map.put("device-b", b"b".to_vec(), None).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = watch.events.recv().await.unwrap();
            if watch.is_live(&event) {
                return event;
            }
        }
    })
    .await
    .expect("no live event");
    assert_eq!(event.kind, MapEventKind::Inserted);
    assert_eq!(event.entry.key, "device-b");

    drop(watch);
    assert_eq!(map.watcher_count(), 0);

    let _ = node.write().await.shutdown().await;
}

#[tokio::test]
async fn test_store_over_raft() {
    let (map, node) = common::spawn_raft_map().await;
    let store = MapDeviceStore::new(map);

    let mut device = Device::new("device-foo");
    device.address = "device-foo:1234".to_string();
    device.version = "1.0.0".to_string();
    let stored = store.store(device).await.unwrap();

    let mut sub = store.watch().await.unwrap();
    let replay = sub.recv().await.unwrap().unwrap();
    assert_eq!(replay.event_type, EventType::None);
    assert_eq!(replay.device, stored);

    let updated = store
        .store(Device {
            address: "device-foo:4321".to_string(),
            ..stored.clone()
        })
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, EventType::Updated);
    assert_eq!(event.device, updated);

    assert!(matches!(
        store.delete(&stored).await,
        Err(StoreError::Conflict(_))
    ));
    let devices: Vec<_> = store.list().await.unwrap().collect().await;
    assert_eq!(devices.len(), 1);

    sub.cancel().await;
    assert_eq!(store.feed().active_subscriptions(), 0);

    let _ = node.write().await.shutdown().await;
}

#[tokio::test]
async fn test_rest_over_raft() {
    let server = common::TestServer::spawn_raft().await;

    let response = server
        .post_json(
            "/devices",
            &json!({
                "id": "device-foo",
                "type": "test",
                "address": "device-foo:1234",
                "version": "1.0.0"
            }),
        )
        .await;
    assert_eq!(response.status(), 201);

    let response = server.get("/devices/device-foo").await;
    assert_eq!(response.status(), 200);

    let store: Arc<MapDeviceStore> = server.store.clone();
    assert!(
        store
            .load(&"device-foo".into())
            .await
            .unwrap()
            .is_some()
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_watch_refused_on_non_leader() {
    let (map, node) = common::spawn_idle_raft_map().await;

    assert!(matches!(map.watch(true).await, Err(MapError::Unavailable(_))));
    assert_eq!(map.watcher_count(), 0);

    let store = Arc::new(MapDeviceStore::new(map.clone()));
    assert!(matches!(store.watch().await, Err(StoreError::Unavailable(_))));
    assert_eq!(store.feed().active_subscriptions(), 0);

    let service = DeviceService::new(store);
    assert!(matches!(
        service.list(true).await,
        Err(ServiceError::Unavailable(_))
    ));
    // Snapshot listing is served from local state
    assert!(service.list(false).await.is_ok());

    let _ = node.write().await.shutdown().await;
}

#[tokio::test]
async fn test_rest_event_stream_on_non_leader_unavailable() {
    let server = common::TestServer::spawn_idle_raft().await;

    let response = server.get("/devices/events?subscribe=true").await;
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"].as_u64().unwrap(), 503);

    assert_eq!(server.get("/devices").await.status(), 200);

    server.shutdown().await;
}
