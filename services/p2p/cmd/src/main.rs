//! Peer-to-peer node binary.
//!
//! Listens for inbound connections and dials configured peers, running one
//! session per TCP connection with the node wire protocol.

use clap::Parser;
use p2p_session::{connect_tcp, listen_tcp, TaskGroup};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod node;

use config::{parse_magic, NodeConfig};
use logging::NodeLogFormatter;
use node::Node;

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Peer-to-peer session node
#[derive(Parser, Debug)]
#[command(name = "p2p-node", version, about = "Peer-to-peer session node")]
struct Args {
    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node ID announced in the hello
    #[arg(long)]
    node_id: Option<u64>,

    /// Network magic, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_magic)]
    network_magic: Option<u32>,

    /// Listen address, e.g. 0.0.0.0:7000
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Connect to address, e.g. 10.0.0.2:7000 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Disable keep-alive pings
    #[arg(long)]
    no_keep_alive: bool,

    /// Keep-alive interval, e.g. 15s
    #[arg(long)]
    keep_alive_interval: Option<humantime::Duration>,

    /// Write timeout, e.g. 10s
    #[arg(long)]
    write_timeout: Option<humantime::Duration>,

    /// Largest accepted frame payload in bytes
    #[arg(long)]
    max_payload: Option<usize>,

    /// Data frame sent to every peer after the handshake
    #[arg(long)]
    greeting: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(node_id) = self.node_id {
            config.node_id = node_id;
        }
        if let Some(magic) = self.network_magic {
            config.network_magic = magic;
        }
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        if !self.connect.is_empty() {
            config.connect = self.connect.clone();
        }
        if self.no_keep_alive {
            config.keep_alive = false;
        }
        if let Some(interval) = self.keep_alive_interval {
            config.keep_alive_interval = interval.into();
        }
        if let Some(timeout) = self.write_timeout {
            config.write_timeout = timeout.into();
        }
        if let Some(max_payload) = self.max_payload {
            config.max_payload = max_payload;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("p2p_node={}", args.log_level).parse()?)
        .add_directive(format!("p2p_session={}", args.log_level).parse()?)
        .add_directive(format!("p2p_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(NodeLogFormatter::new("p2p".to_string()))
        .init();

    info!("Starting p2p node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::from_env(),
    };
    args.apply(&mut config);

    if config.listen.is_none() && config.connect.is_empty() {
        anyhow::bail!("Must specify either --listen or --connect (or both)");
    }

    info!(
        "Node config: node_id={}, network_magic={:#010x}, keep_alive={}, keep_alive_interval={:?}, write_timeout={:?}, max_payload={}",
        config.node_id,
        config.network_magic,
        config.keep_alive,
        config.keep_alive_interval,
        config.write_timeout,
        config.max_payload
    );

    let shutdown = CancellationToken::new();
    let node = Arc::new(Node::new(config.clone(), shutdown.clone()).with_greeting(args.greeting));
    let tasks: TaskGroup<anyhow::Error> = TaskGroup::new();

    if let Some(listen_addr) = config.listen {
        let listener = listen_tcp(listen_addr).await?;
        info!("Listening on {}", listen_addr);

        let node = Arc::clone(&node);
        let shutdown = shutdown.clone();
        let peers = tasks.clone();
        tasks.run(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, peer_addr)) => {
                        info!("Accepted connection from {}", peer_addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                        }
                        let node = Arc::clone(&node);
                        peers.run(async move {
                            if let Err(e) = node.run_peer(stream, "inbound").await {
                                warn!("Inbound session with {} ended: {}", peer_addr, e);
                            }
                            Ok(())
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}; stopping listener", e);
                        return Err(e.into());
                    }
                }
            }
            Ok(())
        });
    }

    for connect_addr in config.connect.iter().copied() {
        info!("Connecting to {}", connect_addr);
        let node = Arc::clone(&node);
        let shutdown = shutdown.clone();
        tasks.run(async move {
            dial(node, connect_addr, shutdown).await;
            Ok(())
        });
    }

    info!("Node started. Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");
    shutdown.cancel();

    if let Err(e) = tasks.wait().await {
        warn!("Node task failed: {:#}", e);
    }

    let stats = node.stats();
    info!(
        "Node stopped: established={}, data_received={}, pongs_sent={}, pongs_received={}, frames_dropped={}",
        stats.established.load(std::sync::atomic::Ordering::Relaxed),
        stats.data_received.load(std::sync::atomic::Ordering::Relaxed),
        stats.pongs_sent.load(std::sync::atomic::Ordering::Relaxed),
        stats.pongs_received.load(std::sync::atomic::Ordering::Relaxed),
        stats.frames_dropped.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}

/// Keep a session to `addr` alive, reconnecting with exponential backoff
async fn dial(node: Arc<Node>, addr: SocketAddr, shutdown: CancellationToken) {
    let mut backoff = Duration::from_millis(500);

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            connected = connect_tcp(addr) => connected,
        };

        match connected {
            Ok(stream) => {
                info!("Connected to {}", addr);
                backoff = Duration::from_millis(500);
                if let Err(e) = node.run_peer(stream, "outbound").await {
                    warn!("Outbound session to {} ended: {}", addr, e);
                }
            }
            Err(e) => warn!("Failed to connect to {}: {}", addr, e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}
