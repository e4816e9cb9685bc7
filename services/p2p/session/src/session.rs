//! Core session state machine.
//!
//! A [`Session`] owns one duplex stream and runs three loops under a single
//! [`TaskGroup`] and cancellation token:
//!
//! - the receive loop decodes the peer handshake, then framed messages, and
//!   hands them to the [`Handler`];
//! - the send loop drains the single-slot send queue onto the stream;
//! - the optional keep-alive loop injects protocol pings through the same
//!   send path as [`Session::write`].
//!
//! Lifecycle: unestablished → established (accepted handshake) → closing →
//! closed. [`Session::close`] tears everything down exactly once.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{is_closed_kind, SessionError};
use crate::logging::{Attr, Logger};
use crate::protocol::{Handler, Protocol};
use crate::task_group::TaskGroup;
use crate::timer::{PooledTimer, TimerPool};
use crate::transport::Connection;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type BoxReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bytes handed to the send loop, read exactly once
pub(crate) enum Payload {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// Unit enqueued on the send path
pub(crate) struct SendPacket {
    payload: Payload,
    /// Completion signal; dropped unanswered only when the session shuts down
    done: oneshot::Sender<Result<(), SessionError>>,
}

pub(crate) struct Inner {
    id: u64,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,

    pub(crate) protocol: Arc<dyn Protocol>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) keep_alive: bool,
    pub(crate) keep_alive_interval: Duration,
    write_timeout: Duration,
    pub(crate) log: Logger,
    pub(crate) timers: Arc<TimerPool>,

    pub(crate) established: AtomicBool,
    closing: AtomicBool,
    pub(crate) receiving: AtomicBool,

    /// Read half, taken once by the receive loop
    pub(crate) reader: Mutex<Option<BoxReader>>,
    /// Write half; the lock is shared by the send loop and `close`
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    /// Reused buffer for accepted messages
    pub(crate) recv_buf: tokio::sync::Mutex<bytes::BytesMut>,
    /// Serializes writers so at most one packet is in flight
    send_lock: tokio::sync::Mutex<()>,
    queue: mpsc::Sender<SendPacket>,

    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: TaskGroup<SessionError>,
    closed: OnceCell<Result<(), SessionError>>,
}

/// Handle to a running session.
///
/// Cloning is cheap; all clones refer to the same session. Sessions are
/// created by [`Network::new_session`](crate::Network::new_session).
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

/// Validated collaborators for a new session
pub(crate) struct Parts {
    pub(crate) protocol: Arc<dyn Protocol>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) timers: Arc<TimerPool>,
    pub(crate) config: SessionConfig,
}

impl Session {
    /// Build the session and start its loops
    pub(crate) fn spawn<C: Connection>(stream: C, cancel: CancellationToken, parts: Parts) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let peer_addr = stream.peer_addr();
        let local_addr = stream.local_addr();

        let mut own_attrs = vec![Attr::new("session", id)];
        if let Some(peer) = peer_addr {
            own_attrs.push(Attr::new("peer", peer));
        }
        let log = Logger::new(Arc::clone(&parts.config.log_sink))
            .with(parts.config.log_attrs.iter().cloned())
            .with(own_attrs);

        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let write_half: BoxWriter = Box::new(write_half);
        let (queue_tx, queue_rx) = mpsc::channel(1);

        let session = Session {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                local_addr,
                protocol: parts.protocol,
                handler: parts.handler,
                keep_alive: parts.config.keep_alive,
                keep_alive_interval: parts.config.keep_alive_interval,
                write_timeout: parts.config.write_timeout,
                log,
                timers: parts.timers,
                established: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                receiving: AtomicBool::new(false),
                reader: Mutex::new(Some(BufReader::new(read_half))),
                writer: tokio::sync::Mutex::new(Some(write_half)),
                recv_buf: tokio::sync::Mutex::new(bytes::BytesMut::new()),
                send_lock: tokio::sync::Mutex::new(()),
                queue: queue_tx,
                cancel,
                tasks: TaskGroup::new(),
                closed: OnceCell::new(),
            }),
        };

        // Intentional shutdown is never a failure.
        session.inner.tasks.on_error(|err| match err {
            SessionError::Shutdown => None,
            other => Some(other),
        });

        session.inner.tasks.run(session.clone().receive_loop());
        session.inner.tasks.run(session.clone().send_loop(queue_rx));
        if session.inner.keep_alive {
            session.inner.tasks.run(session.clone().keep_alive_loop());
        }

        session.inner.log.debug(format_args!("Session started"));
        session
    }

    /// Process-unique session identifier
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote address of the underlying stream, if any
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Local address of the underlying stream, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Whether the peer handshake has been accepted
    pub fn is_established(&self) -> bool {
        self.inner.established.load(Ordering::Acquire)
    }

    /// Whether `close` has started
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Logger carrying this session's attributes
    pub fn logger(&self) -> &Logger {
        &self.inner.log
    }

    /// Write bytes to the peer.
    ///
    /// Writes are serialized: bytes reach the stream in the order the calls
    /// were enqueued and never interleave. Fails with
    /// [`SessionError::WriteTimeout`] when the configured timeout elapses,
    /// [`SessionError::Shutdown`] when the session is cancelled or closed, or
    /// [`SessionError::Io`] when the stream write itself fails.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        self.send(Payload::Bytes(data.into())).await
    }

    /// Write everything `reader` yields as one unit, same contract as `write`
    pub async fn write_from<R>(&self, reader: R) -> Result<(), SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.send(Payload::Reader(Box::new(reader))).await
    }

    pub(crate) async fn send(&self, payload: Payload) -> Result<(), SessionError> {
        let _serial = self.inner.send_lock.lock().await;

        let (done_tx, done_rx) = oneshot::channel();
        let packet = SendPacket {
            payload,
            done: done_tx,
        };

        let mut timer = self.inner.timers.get();
        timer.arm(self.inner.write_timeout);
        let result = self.enqueue_and_wait(packet, done_rx, &mut timer).await;
        self.inner.timers.put(timer);
        result
    }

    async fn enqueue_and_wait(
        &self,
        packet: SendPacket,
        done: oneshot::Receiver<Result<(), SessionError>>,
        timer: &mut PooledTimer,
    ) -> Result<(), SessionError> {
        tokio::select! {
            biased;

            _ = self.inner.cancel.cancelled() => return Err(SessionError::Shutdown),

            sent = self.inner.queue.send(packet) => {
                if sent.is_err() {
                    return Err(SessionError::Shutdown);
                }
            }

            _ = &mut *timer => return Err(SessionError::WriteTimeout),
        }

        tokio::select! {
            biased;

            outcome = done => match outcome {
                Ok(result) => result,
                // The send loop went away with the packet still queued.
                Err(_) => Err(SessionError::Shutdown),
            },

            _ = self.inner.cancel.cancelled() => Err(SessionError::Shutdown),

            _ = &mut *timer => Err(SessionError::WriteTimeout),
        }
    }

    /// Drain the send queue onto the stream
    async fn send_loop(self, mut queue: mpsc::Receiver<SendPacket>) -> Result<(), SessionError> {
        let mut local = Vec::new();

        loop {
            let packet = tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(SessionError::Shutdown),
                packet = queue.recv() => match packet {
                    Some(packet) => packet,
                    None => return Err(SessionError::Shutdown),
                },
            };

            let SendPacket { payload, done } = packet;
            if done.is_closed() {
                // The writer gave up (timeout or shutdown); never put its bytes on the wire.
                self.inner.log.trace(format_args!("Discarding abandoned packet"));
                continue;
            }

            local.clear();
            let result = match self.copy_payload(payload, &mut local).await {
                Ok(()) => self.write_stream(&local).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => {
                    let _ = done.send(Ok(()));
                }
                Err(err) => {
                    if !matches!(err, SessionError::Shutdown) {
                        self.inner.log.warn(format_args!("Send loop failed: {}", err));
                    }
                    let _ = done.send(Err(err.clone()));
                    return Err(err);
                }
            }
        }
    }

    async fn copy_payload(&self, payload: Payload, local: &mut Vec<u8>) -> Result<(), SessionError> {
        match payload {
            Payload::Bytes(bytes) => {
                local.extend_from_slice(&bytes);
                Ok(())
            }
            Payload::Reader(mut reader) => tokio::select! {
                read = reader.read_to_end(local) => read.map(|_| ()).map_err(SessionError::io),
                _ = self.inner.cancel.cancelled() => Err(SessionError::Shutdown),
            },
        }
    }

    /// Write under the stream lock, skipping once the session is closing
    async fn write_stream(&self, data: &[u8]) -> Result<(), SessionError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Ok(());
        };
        if self.is_closing() || self.inner.cancel.is_cancelled() {
            return Ok(());
        }

        tokio::select! {
            written = async {
                stream.write_all(data).await?;
                stream.flush().await
            } => written.map_err(SessionError::io),
            _ = self.inner.cancel.cancelled() => Err(SessionError::Shutdown),
        }
    }

    /// Close the session.
    ///
    /// Cancels the loops, closes the stream and waits for every loop to
    /// return. The core runs once; concurrent and repeated callers all get
    /// the same result: the join of the loops' errors and the stream close
    /// error.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.inner
            .closed
            .get_or_init(|| self.shutdown())
            .await
            .clone()
    }

    async fn shutdown(&self) -> Result<(), SessionError> {
        if self
            .inner
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.log.debug(format_args!("Closing session"));
        }

        // Cancel first so a send loop blocked in a write releases the stream lock.
        self.inner.cancel.cancel();
        let stream_result = self.close_stream().await;
        let tasks_result = self.inner.tasks.wait().await;

        let result = SessionError::join([tasks_result.err(), stream_result.err()]);
        match &result {
            Ok(()) => self.inner.log.debug(format_args!("Session closed")),
            Err(err) => self.inner.log.warn(format_args!("Session closed with error: {}", err)),
        }
        result
    }

    async fn close_stream(&self) -> Result<(), SessionError> {
        let mut writer = self.inner.writer.lock().await;
        let Some(mut stream) = writer.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.inner.write_timeout, stream.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if is_closed_kind(err.kind()) => Ok(()),
            Ok(Err(err)) => Err(SessionError::io(err)),
            Err(_) => {
                self.inner
                    .log
                    .warn(format_args!("Stream shutdown timed out, dropping it"));
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("established", &self.is_established())
            .field("closing", &self.is_closing())
            .finish()
    }
}
