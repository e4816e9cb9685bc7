//! Node runtime: one session per connection, driven by a peer task.

use bytes::Bytes;
use p2p_session::{
    Attr, Connection, Handler, Handshake, Message, Network, Session, SessionConfig, SessionError,
};
use p2p_wire::{frame_header, Flags, FrameType, Hello, NodeProtocol};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// Frames queued per peer before new ones are dropped
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// Lifecycle events forwarded from the session handler to its peer task.
///
/// Each fires at most once per session.
#[derive(Debug)]
pub enum PeerEvent {
    /// Peer hello accepted
    Established { node_id: u64 },
    /// Peer hello rejected
    Rejected { node_id: u64 },
    /// Peer closed the connection
    Closed,
    /// Receive failure
    Failed(SessionError),
}

/// Frame received from a peer
#[derive(Debug)]
pub struct PeerFrame {
    pub typ: FrameType,
    pub flags: Flags,
    pub payload: Bytes,
}

/// Session handler that only forwards; it never blocks the receive loop
pub struct NodeHandler {
    frames: mpsc::Sender<PeerFrame>,
    events: mpsc::UnboundedSender<PeerEvent>,
    stats: Arc<NodeStats>,
}

impl NodeHandler {
    fn new(
        capacity: usize,
        stats: Arc<NodeStats>,
    ) -> (
        Self,
        mpsc::Receiver<PeerFrame>,
        mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let (frames_tx, frames) = mpsc::channel(capacity);
        let (events_tx, events) = mpsc::unbounded_channel();
        let handler = Self {
            frames: frames_tx,
            events: events_tx,
            stats,
        };
        (handler, frames, events)
    }

    fn forward(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            debug!(component = "node", "Peer task gone, dropping session event");
        }
    }

    /// Queue a frame, dropping it when the peer task is behind
    fn forward_frame(&self, frame: PeerFrame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let dropped = self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    component = "node",
                    dropped,
                    "Frame queue full, dropping {:?} frame",
                    frame.typ
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(component = "node", "Peer task gone, dropping frame");
            }
        }
    }
}

impl Handler for NodeHandler {
    fn on_receive(&self, _session: &Session, message: Message<'_>) {
        if let Some(header) = frame_header(&message) {
            self.forward_frame(PeerFrame {
                typ: header.typ,
                flags: header.flags,
                payload: Bytes::copy_from_slice(message.payload()),
            });
        }
    }

    fn on_handshake(&self, _session: &Session, handshake: &dyn Handshake) {
        if let Some(hello) = handshake.as_any().downcast_ref::<Hello>() {
            self.forward(PeerEvent::Established {
                node_id: hello.node_id,
            });
        }
    }

    fn on_handshake_failed(&self, _session: &Session, handshake: &dyn Handshake) {
        let node_id = handshake
            .as_any()
            .downcast_ref::<Hello>()
            .map_or(0, |hello| hello.node_id);
        self.forward(PeerEvent::Rejected { node_id });
    }

    fn on_close(&self, _session: &Session) {
        self.forward(PeerEvent::Closed);
    }

    fn on_failure(&self, _session: &Session, error: &SessionError) {
        self.forward(PeerEvent::Failed(error.clone()));
    }
}

/// Counters shared by all peer tasks
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Sessions that completed the handshake
    pub established: AtomicU64,
    /// Data frames received
    pub data_received: AtomicU64,
    /// Pongs sent in answer to pings
    pub pongs_sent: AtomicU64,
    /// Pongs received
    pub pongs_received: AtomicU64,
    /// Frames dropped because a peer task fell behind
    pub frames_dropped: AtomicU64,
}

/// A running node
pub struct Node {
    network: Network,
    protocol: NodeProtocol,
    config: NodeConfig,
    greeting: Option<Bytes>,
    shutdown: CancellationToken,
    stats: Arc<NodeStats>,
}

impl Node {
    /// Create a node; `shutdown` is the parent of every session token
    pub fn new(config: NodeConfig, shutdown: CancellationToken) -> Self {
        let protocol = NodeProtocol::new(config.network_magic, config.node_id)
            .with_max_payload(config.max_payload);
        Self {
            network: Network::new(),
            protocol,
            config,
            greeting: None,
            shutdown,
            stats: Arc::new(NodeStats::default()),
        }
    }

    /// Data sent to every peer once its hello was accepted
    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting.map(Bytes::from);
        self
    }

    /// Node counters
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn session_config(&self, handler: NodeHandler, role: &'static str) -> SessionConfig {
        SessionConfig::builder()
            .protocol(Arc::new(self.protocol.clone()))
            .handler(Arc::new(handler))
            .keep_alive(self.config.keep_alive)
            .keep_alive_interval(self.config.keep_alive_interval)
            .connection_write_timeout(self.config.write_timeout)
            .log_attrs([
                Attr::new("node", self.config.node_id),
                Attr::new("role", role),
            ])
            .build()
    }

    /// Run one session over `stream` until it ends or the node shuts down
    pub async fn run_peer<C: Connection>(
        &self,
        stream: C,
        role: &'static str,
    ) -> Result<(), SessionError> {
        let (handler, frames, events) =
            NodeHandler::new(FRAME_QUEUE_CAPACITY, Arc::clone(&self.stats));
        let config = self.session_config(handler, role);
        let session = self.network.new_session(&self.shutdown, stream, config)?;

        let outcome = match session.write(self.protocol.hello()).await {
            Ok(()) => self.drive(&session, frames, events).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(component = "node", session = session.id(), "Peer task failed: {}", err);
        }

        let closed = session.close().await;
        match (outcome, closed) {
            (Err(SessionError::Shutdown), closed) => closed,
            (outcome, closed) => SessionError::join([outcome.err(), closed.err()]),
        }
    }

    async fn drive(
        &self,
        session: &Session,
        mut frames: mpsc::Receiver<PeerFrame>,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return Ok(()),

                Some(frame) = frames.recv() => self.handle_frame(session, frame).await?,

                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(session, event).await? {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_frame(&self, session: &Session, frame: PeerFrame) -> Result<(), SessionError> {
        let PeerFrame {
            typ,
            flags,
            payload,
        } = frame;

        match typ {
            FrameType::Data => {
                self.stats.data_received.fetch_add(1, Ordering::Relaxed);
                info!(
                    component = "node",
                    session = session.id(),
                    "Received {} bytes: {}",
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
            }
            FrameType::Ping if flags.contains(Flags::PONG_REQUESTED) => {
                session.write(self.protocol.pong_frame()).await?;
                self.stats.pongs_sent.fetch_add(1, Ordering::Relaxed);
            }
            FrameType::Ping => {}
            FrameType::Pong => {
                self.stats.pongs_received.fetch_add(1, Ordering::Relaxed);
                debug!(component = "node", session = session.id(), "Keep-alive answered");
            }
        }
        Ok(())
    }

    /// Handle a lifecycle event; `false` ends the peer task
    async fn handle_event(&self, session: &Session, event: PeerEvent) -> Result<bool, SessionError> {
        match event {
            PeerEvent::Established { node_id } => {
                self.stats.established.fetch_add(1, Ordering::Relaxed);
                info!(
                    component = "node",
                    session = session.id(),
                    peer_node = node_id,
                    "Peer established"
                );
                if let Some(greeting) = &self.greeting {
                    let frame = self
                        .protocol
                        .data_frame(greeting)
                        .map_err(|e| SessionError::Io(Arc::new(e.into())))?;
                    session.write(frame).await?;
                }
                Ok(true)
            }
            PeerEvent::Rejected { node_id } => {
                warn!(
                    component = "node",
                    session = session.id(),
                    peer_node = node_id,
                    "Peer hello rejected"
                );
                Ok(false)
            }
            PeerEvent::Closed => {
                info!(component = "node", session = session.id(), "Peer closed the session");
                Ok(false)
            }
            PeerEvent::Failed(err) => {
                warn!(component = "node", session = session.id(), "Session failed: {}", err);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn node(node_id: u64, keep_alive_interval: Duration, shutdown: &CancellationToken) -> Arc<Node> {
        let config = NodeConfig {
            node_id,
            keep_alive_interval,
            ..NodeConfig::default()
        };
        Arc::new(Node::new(config, shutdown.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_answer_pings_and_greet() {
        let shutdown = CancellationToken::new();
        let a = node(1, Duration::from_secs(1), &shutdown);
        let b = Arc::new(
            Node::new(
                NodeConfig {
                    node_id: 2,
                    keep_alive: false,
                    ..NodeConfig::default()
                },
                shutdown.clone(),
            )
            .with_greeting(Some("Hello session".to_string())),
        );

        let (a_stream, b_stream) = duplex(4096);
        let a_task = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.run_peer(a_stream, "outbound").await })
        };
        let b_task = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.run_peer(b_stream, "inbound").await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(a.stats().established.load(Ordering::Relaxed), 1);
        assert_eq!(b.stats().established.load(Ordering::Relaxed), 1);
        assert_eq!(a.stats().data_received.load(Ordering::Relaxed), 1);
        assert!(b.stats().pongs_sent.load(Ordering::Relaxed) >= 3);
        assert!(a.stats().pongs_received.load(Ordering::Relaxed) >= 3);

        shutdown.cancel();
        assert!(a_task.await.unwrap().is_ok());
        assert!(b_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_full_frame_queue_drops_and_counts() {
        let stats = Arc::new(NodeStats::default());
        let (handler, mut frames, mut events) = NodeHandler::new(2, Arc::clone(&stats));

        for seq in 0u8..5 {
            handler.forward_frame(PeerFrame {
                typ: FrameType::Data,
                flags: Flags::empty(),
                payload: Bytes::from(vec![seq]),
            });
        }
        handler.forward(PeerEvent::Closed);

        assert_eq!(stats.frames_dropped.load(Ordering::Relaxed), 3);
        assert_eq!(frames.recv().await.unwrap().payload, Bytes::from_static(&[0]));
        assert_eq!(frames.recv().await.unwrap().payload, Bytes::from_static(&[1]));
        assert!(frames.try_recv().is_err());
        assert!(matches!(events.recv().await, Some(PeerEvent::Closed)));
    }

    #[tokio::test]
    async fn test_same_node_id_is_rejected() {
        let shutdown = CancellationToken::new();
        let a = node(7, Duration::from_secs(15), &shutdown);
        let b = node(7, Duration::from_secs(15), &shutdown);

        let (a_stream, b_stream) = duplex(4096);
        let (a_result, b_result) = tokio::join!(
            a.run_peer(a_stream, "outbound"),
            b.run_peer(b_stream, "inbound")
        );

        assert!(matches!(a_result, Err(SessionError::UnacceptableHandshake)));
        assert!(matches!(b_result, Err(SessionError::UnacceptableHandshake)));
        assert_eq!(a.stats().established.load(Ordering::Relaxed), 0);
        assert!(!shutdown.is_cancelled());
    }
}
