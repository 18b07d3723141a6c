//! Shared test utilities for topo-api integration tests.

#![allow(dead_code)]

use mraft::{NodeConfig, RaftNode, StorageBackend};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast};
use topo_api::map::EVENT_BUFFER;
use topo_api::rest::{AppState, create_router};
use topo_api::{
    Command, DeviceAuditLogger, DeviceService, LocalMap, MapDeviceStore, MapEvent, MapState,
    RaftMap, Response, VersionedMap,
};

pub type Node = RaftNode<Command, Response, MapState>;

/// Allocate an available port for testing.
pub fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

/// Start a single-node Raft cluster with in-memory storage and return it
/// wrapped as a map.
pub async fn spawn_raft_map() -> (Arc<RaftMap>, Arc<RwLock<Node>>) {
    start_raft_map(true).await
}

/// Start a Raft node that never joins a cluster, so it never becomes leader.
pub async fn spawn_idle_raft_map() -> (Arc<RaftMap>, Arc<RwLock<Node>>) {
    start_raft_map(false).await
}

async fn start_raft_map(bootstrap: bool) -> (Arc<RaftMap>, Arc<RwLock<Node>>) {
    let config = NodeConfig {
        id: 1,
        listen_addr: format!("127.0.0.1:{}", allocate_port()),
        peers: std::collections::BTreeMap::new(),
        storage: StorageBackend::Memory,
        raft_config: None,
    };

    let mut node: Node = RaftNode::new(config).await.expect("Failed to create node");
    node.start().await.expect("Failed to start node");

    if bootstrap {
        node.generate_cluster_secret();
        node.initialize_cluster()
            .await
            .expect("Failed to bootstrap cluster");

        node.wait_for_leader(std::time::Duration::from_secs(5))
            .await
            .expect("No leader elected");
    }

    let (event_tx, _) = broadcast::channel::<MapEvent>(EVENT_BUFFER);
    node.set_event_sink(event_tx.clone());

    let node = Arc::new(RwLock::new(node));
    (Arc::new(RaftMap::new(node.clone(), event_tx)), node)
}

/// Test server serving the REST API over a chosen map.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: Arc<MapDeviceStore>,
    raft_node: Option<Arc<RwLock<Node>>>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    /// Spawn a test server over an in-process map.
    pub async fn spawn() -> Self {
        Self::spawn_with(Arc::new(LocalMap::new()), None).await
    }

    /// Spawn a test server over a single-node Raft cluster.
    pub async fn spawn_raft() -> Self {
        let (map, node) = spawn_raft_map().await;
        Self::spawn_with(map, Some(node)).await
    }

    /// Spawn a test server over a Raft node that is not the leader.
    pub async fn spawn_idle_raft() -> Self {
        let (map, node) = spawn_idle_raft_map().await;
        Self::spawn_with(map, Some(node)).await
    }

    async fn spawn_with(map: Arc<dyn VersionedMap>, raft_node: Option<Arc<RwLock<Node>>>) -> Self {
        let store = Arc::new(MapDeviceStore::new(map));
        let app_state = Arc::new(AppState {
            service: Arc::new(DeviceService::new(store.clone())),
            audit: Arc::new(DeviceAuditLogger::new_noop()),
        });
        let router = create_router(app_state);

        // Port 0 lets the OS choose
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
        let actual_addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        // Small delay to ensure server is ready
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Self {
            addr: actual_addr,
            client: Client::new(),
            store,
            raft_node,
            shutdown_tx,
        }
    }

    /// Get base URL for the REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Perform a GET request.
    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a POST request with JSON body.
    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a PUT request with JSON body.
    pub async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .put(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a DELETE request.
    pub async fn delete(&self, path: &str) -> ReqwestResponse {
        self.client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Some(node) = self.raft_node {
            let mut node = node.write().await;
            let _ = node.shutdown().await;
        }
    }
}

/// Minimal Server-Sent Events reader over a streaming response.
pub struct SseReader {
    response: ReqwestResponse,
    buffer: String,
}

/// One parsed SSE frame.
#[derive(Debug)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseReader {
    pub fn new(response: ReqwestResponse) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Next non-comment frame, or `None` when the stream ends.
    pub async fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            while let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                let mut frame = SseFrame {
                    event: "message".to_string(),
                    data: String::new(),
                };
                let mut has_data = false;
                for line in raw.lines() {
                    if let Some(event) = line.strip_prefix("event:") {
                        frame.event = event.trim().to_string();
                    } else if let Some(data) = line.strip_prefix("data:") {
                        frame.data.push_str(data.trim_start());
                        has_data = true;
                    }
                }
                if has_data {
                    return Some(frame);
                }
            }

            let chunk = self.response.chunk().await.expect("SSE read failed")?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}
