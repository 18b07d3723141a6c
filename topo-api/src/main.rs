use clap::Parser;
use mraft::{JoinToken, NodeConfig, RaftNode, StorageBackend};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use topo_api::map::EVENT_BUFFER;
use topo_api::rest::{AppState, create_router};
use topo_api::{
    Command, DeviceAuditLogger, DeviceService, LocalMap, MapDeviceStore, MapEvent, MapState,
    NodeId, RaftMap, Response, VersionedMap, create_audit_logger,
};

type Node = RaftNode<Command, Response, MapState>;

#[derive(Parser)]
#[command(name = "topo-api")]
#[command(about = "topo API Server - replicated network device inventory")]
struct Args {
    /// Node ID for this instance (auto-detected from token when using --join)
    #[arg(long)]
    node_id: Option<NodeId>,

    /// Listen address for Raft gRPC (node-to-node)
    #[arg(long, default_value = "127.0.0.1:6001")]
    raft_listen: String,

    /// Listen address for REST API (client)
    #[arg(short, long, default_value = "[::]:5150")]
    listen: String,

    /// Peer nodes (format: id:addr, can be repeated)
    #[arg(long, value_parser = parse_peer)]
    peer: Vec<(NodeId, String)>,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "/var/lib/topo")]
    data_dir: PathBuf,

    /// Bootstrap a new cluster (only for the first node)
    #[arg(long)]
    bootstrap: bool,

    /// Run in development mode (single-node, ephemeral storage)
    #[arg(long)]
    dev: bool,

    /// Serve from an in-process map without Raft replication
    #[arg(long, conflicts_with_all = ["join", "bootstrap", "peer"])]
    local: bool,

    /// Per-call deadline for store operations, in seconds
    #[arg(long, env = "TOPO_STORE_TIMEOUT_SECS", default_value_t = 15)]
    store_timeout_secs: u64,

    /// Join an existing cluster (leader's Raft gRPC address)
    #[arg(long)]
    join: Option<String>,

    /// Join token (required with --join)
    #[arg(long)]
    token: Option<String>,
}

fn parse_peer(s: &str) -> Result<(NodeId, String), String> {
    let (id_str, addr) = s
        .split_once(':')
        .ok_or("Expected format: id:addr".to_string())?;
    let id: NodeId = id_str.parse().map_err(|_| "Invalid node ID".to_string())?;
    Ok((id, addr.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("topo_api=info".parse()?))
        .init();

    let args = Args::parse();

    let audit = if args.dev || args.local {
        Arc::new(DeviceAuditLogger::new_noop())
    } else {
        create_audit_logger("topo-api")
    };

    let (map, raft_node): (Arc<dyn VersionedMap>, Option<Arc<RwLock<Node>>>) = if args.local {
        info!("Starting topo-api with a local map - REST: {}", args.listen);
        (Arc::new(LocalMap::new()), None)
    } else {
        let mut node = start_raft(&args, &audit).await?;

        // Wire the event sink before sharing the node so no apply goes unobserved
        let (event_tx, _) = broadcast::channel::<MapEvent>(EVENT_BUFFER);
        node.set_event_sink(event_tx.clone());

        let node = Arc::new(RwLock::new(node));
        (Arc::new(RaftMap::new(node.clone(), event_tx)), Some(node))
    };

    let store = MapDeviceStore::new(map)
        .with_timeout(Duration::from_secs(args.store_timeout_secs));
    let service = Arc::new(DeviceService::new(Arc::new(store)));

    let app_state = Arc::new(AppState { service, audit });
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("REST API listening on {}", args.listen);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let rest_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    // Wait for shutdown signal
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = rest_handle.await {
        warn!("REST server task failed: {}", e);
    }

    if let Some(node) = raft_node {
        info!("Shutting down Raft node...");
        node.write().await.shutdown().await?;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create and start the Raft node, then bootstrap or join as requested.
async fn start_raft(
    args: &Args,
    audit: &DeviceAuditLogger,
) -> Result<Node, Box<dyn std::error::Error + Send + Sync>> {
    // Resolve node_id: from --node-id, or extract from token when joining
    let node_id: NodeId = if let Some(id) = args.node_id {
        id
    } else if let Some(token) = &args.token {
        JoinToken::peek_node_id(token).ok_or("Invalid token format: cannot extract node ID")?
    } else if args.dev {
        1
    } else {
        return Err("--node-id is required (or use --join with --token)".into());
    };

    if args.join.is_none() && !args.dev && !args.bootstrap {
        warn!(
            "Neither --bootstrap, --dev, nor --join specified. Node will wait for cluster membership."
        );
    }

    if !args.dev {
        tokio::fs::create_dir_all(&args.data_dir).await?;
    }

    info!(
        "Starting topo-api node {} - Raft: {}, REST: {}",
        node_id, args.raft_listen, args.listen
    );

    let config = NodeConfig {
        id: node_id,
        listen_addr: args.raft_listen.clone(),
        peers: args.peer.iter().cloned().collect::<BTreeMap<_, _>>(),
        storage: if args.dev {
            StorageBackend::Memory
        } else {
            StorageBackend::Persistent {
                path: args.data_dir.join("raft.db"),
            }
        },
        raft_config: None,
    };

    let mut node: Node = RaftNode::new(config).await?;
    node.start().await?;

    if let Some(leader_addr) = &args.join {
        let token = args
            .token
            .as_ref()
            .ok_or("--token is required when using --join")?;

        info!("Joining cluster via {}", leader_addr);
        node.join_cluster(leader_addr, token)
            .await
            .map_err(|e| format!("Failed to join cluster: {}", e))?;
        info!("Successfully joined cluster");
    } else if args.bootstrap || args.dev {
        info!("Bootstrapping new cluster");
        node.generate_cluster_secret();
        node.initialize_cluster().await?;
    }

    info!("Waiting for leader election...");
    if let Some(leader) = node.wait_for_leader(Duration::from_secs(10)).await {
        info!("Leader elected: node {}", leader);
        audit.leader_elected(leader);
    } else {
        warn!("No leader elected within timeout");
    }

    Ok(node)
}
