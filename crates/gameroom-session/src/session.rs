//! The connection session: one client's live duplex channel.
//!
//! A session owns a bounded outbound queue and two independent tasks:
//!
//! ```text
//!                 ┌──────────── reader task ────────────┐
//!  transport ───► │ conn.recv() ──► inbound queue ──────┼──► dispatch loop
//!                 └─────────────────────────────────────┘
//!                 ┌──────────── writer task ────────────┐
//!  transport ◄─── │ conn.send() ◄── outbound queue ◄────┼─── rooms, replies
//!                 └─────────────────────────────────────┘
//! ```
//!
//! The tasks never wait on each other, so a client that stops reading
//! cannot stall inbound processing and vice versa. Closing flips a `watch`
//! flag both tasks select on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gameroom_protocol::{Codec, RoomId, ServerFrame};
use gameroom_transport::Connection;
use tokio::sync::{mpsc, watch};

use crate::SessionError;

/// Counter for session handles. Never reused within a process.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session queues and shutdown.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the outbound queue. A full queue marks the client as
    /// stalled and gets it disconnected by its room.
    pub outbound_capacity: usize,

    /// Capacity of the inbound queue between the reader task and the
    /// dispatch loop.
    pub inbound_capacity: usize,

    /// How long the writer keeps flushing already-queued frames after the
    /// session is closed before releasing the transport.
    pub flush_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            inbound_capacity: 32,
            flush_timeout: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque handle identifying one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConnectionSession
// ---------------------------------------------------------------------------

/// Handle to a live session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    outbound: mpsc::Sender<ServerFrame>,
    closed: watch::Sender<bool>,
    /// Back-reference to the room this session is in, by code. The room
    /// itself is owned by the registry.
    room: Mutex<Option<RoomId>>,
}

impl ConnectionSession {
    /// Creates a session without a transport attached.
    ///
    /// The returned receiver is the outbound queue; whoever holds it plays
    /// the writer. [`spawn`](Self::spawn) builds on this, and tests use it
    /// to observe exactly what a client would be sent.
    pub fn new(outbound_capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (outbound, queue) = mpsc::channel(outbound_capacity.max(1));
        let (closed, _) = watch::channel(false);
        let session = Self {
            inner: Arc::new(Inner {
                id: SessionId::next(),
                outbound,
                closed,
                room: Mutex::new(None),
            }),
        };
        (session, queue)
    }

    /// Wraps an accepted connection: starts its reader and writer tasks and
    /// returns the session handle plus the inbound frame stream.
    pub fn spawn<C, K>(
        conn: C,
        codec: K,
        config: &SessionConfig,
    ) -> (Self, SessionInbound)
    where
        C: Connection,
        K: Codec + Clone,
    {
        let (session, queue) = Self::new(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let conn = Arc::new(conn);

        tracing::debug!(
            session_id = %session.id(),
            conn_id = %conn.id(),
            "session started"
        );

        tokio::spawn(read_loop(Arc::clone(&conn), session.clone(), inbound_tx));
        tokio::spawn(write_loop(
            conn,
            codec,
            session.clone(),
            queue,
            config.flush_timeout,
        ));

        let inbound = SessionInbound {
            frames: inbound_rx,
            closed: session.inner.closed.subscribe(),
        };
        (session, inbound)
    }

    /// Returns this session's handle.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns `true` until [`close`](Self::close) has been called.
    pub fn is_alive(&self) -> bool {
        !*self.inner.closed.borrow()
    }

    /// Enqueues a frame without waiting.
    ///
    /// Returns `false` if the queue is full (the client is stalled) or the
    /// session is closed. Never blocks and never errors: sending to a dead
    /// session is a no-op.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.is_alive() && self.inner.outbound.try_send(frame).is_ok()
    }

    /// Enqueues a reply to this client, waiting for queue space.
    ///
    /// Used by the session's own dispatch loop, where waiting only slows
    /// the client that is already behind.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] if the session closes first.
    pub async fn reply(&self, frame: ServerFrame) -> Result<(), SessionError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(SessionError::Closed(self.id()));
        }
        tokio::select! {
            result = self.inner.outbound.send(frame) => {
                result.map_err(|_| SessionError::Closed(self.id()))
            }
            _ = wait_closed(&mut closed) => Err(SessionError::Closed(self.id())),
        }
    }

    /// Closes the session. Idempotent.
    ///
    /// Wakes both tasks; the writer flushes what is already queued (bounded
    /// by [`SessionConfig::flush_timeout`]) and then closes the transport.
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let first = self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if first {
            tracing::debug!(session_id = %self.id(), "session closed");
        }
        first
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        wait_closed(&mut closed).await;
    }

    /// Returns the room this session is currently a member of.
    pub fn room(&self) -> Option<RoomId> {
        self.lock_room().clone()
    }

    /// Records (or clears) the room this session belongs to.
    ///
    /// Called by the room on join and leave.
    pub fn set_room(&self, room: Option<RoomId>) {
        *self.lock_room() = room;
    }

    fn lock_room(&self) -> std::sync::MutexGuard<'_, Option<RoomId>> {
        // Poisoning would need a panic while holding a plain assignment.
        self.inner
            .room
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for ConnectionSession {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionSession {}

// ---------------------------------------------------------------------------
// SessionInbound
// ---------------------------------------------------------------------------

/// Stream of raw inbound frames for the dispatch loop.
pub struct SessionInbound {
    frames: mpsc::Receiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

impl SessionInbound {
    /// Returns the next inbound frame.
    ///
    /// `None` means the session is over: the transport reached EOF, failed,
    /// or the session was closed from elsewhere (room stall policy,
    /// registry shutdown).
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            _ = wait_closed(&mut self.closed) => None,
            frame = self.frames.recv() => frame,
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Waits for the closed flag. Kept as its own function so the `watch::Ref`
/// never lives inside a caller's future.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives inside the session, so an error cannot outlive it.
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn read_loop<C: Connection>(
    conn: Arc<C>,
    session: ConnectionSession,
    inbound: mpsc::Sender<Vec<u8>>,
) {
    let session_id = session.id();
    let mut closed = session.inner.closed.subscribe();

    loop {
        let result = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            result = conn.recv() => result,
        };

        match result {
            Ok(Some(data)) => {
                // The dispatch loop drops its receiver when it terminates.
                if inbound.send(data).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(%session_id, "transport closed by peer");
                session.close();
                break;
            }
            Err(e) => {
                let err = SessionError::Transport(session_id, e.to_string());
                tracing::debug!(%session_id, error = %err, "transport read failed");
                session.close();
                break;
            }
        }
    }

    tracing::trace!(%session_id, "reader task ended");
}

async fn write_loop<C: Connection, K: Codec>(
    conn: Arc<C>,
    codec: K,
    session: ConnectionSession,
    mut queue: mpsc::Receiver<ServerFrame>,
    flush_timeout: Duration,
) {
    let session_id = session.id();
    let mut closed = session.inner.closed.subscribe();

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let written = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            result = write_frame(&*conn, &codec, session_id, &frame) => result,
        };
        if let Err(e) = written {
            tracing::debug!(%session_id, error = %e, "transport write failed");
            session.close();
            break;
        }
    }

    // Flush what was queued before the close (e.g. `room_closed`).
    let flush = async {
        while let Ok(frame) = queue.try_recv() {
            if write_frame(&*conn, &codec, session_id, &frame).await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(flush_timeout, flush).await.is_err() {
        tracing::debug!(%session_id, "flush timed out, dropping queued frames");
    }

    if let Err(e) = conn.close().await {
        tracing::trace!(%session_id, error = %e, "transport close failed");
    }
    tracing::trace!(%session_id, "writer task ended");
}

async fn write_frame<C: Connection, K: Codec>(
    conn: &C,
    codec: &K,
    session_id: SessionId,
    frame: &ServerFrame,
) -> Result<(), SessionError> {
    let bytes = codec
        .encode(frame)
        .map_err(|e| SessionError::Encode(session_id, e))?;
    conn.send(&bytes)
        .await
        .map_err(|e| SessionError::Transport(session_id, e.to_string()))
}
