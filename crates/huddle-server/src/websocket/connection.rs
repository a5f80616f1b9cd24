//! Per-socket connection state shared between the session task, the hub,
//! and the liveness monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use huddle_core::{ConnectionId, UserRef};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(Arc<String>),
    /// Binary frame, forwarded untouched.
    Binary(Bytes),
    /// Transport-level liveness probe.
    Ping,
    /// Flush what is queued, send a close frame, and stop.
    Close,
}

impl Frame {
    /// Payload bytes of a data frame; empty for control frames.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => &bytes[..],
            Self::Ping | Self::Close => &[],
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(Arc::new(text))
    }
}

/// One open duplex connection.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Identity attached via a `join` (or any payload carrying `user`).
    bound_user: Mutex<Option<UserRef>>,
    /// Send channel to the socket writer task.
    tx: mpsc::Sender<Frame>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer acknowledged the last probe.
    is_alive: AtomicBool,
    /// When the last transport pong arrived.
    last_pong: Mutex<Instant>,
    /// Set once a graceful close has been queued.
    closing: AtomicBool,
    /// Cancelled to tear the socket down without a close handshake.
    terminated: CancellationToken,
    /// Frames dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            bound_user: Mutex::new(None),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            closing: AtomicBool::new(false),
            terminated: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a user.
    pub fn bind_user(&self, user: UserRef) {
        *self.bound_user.lock() = Some(user);
    }

    /// Forget the bound user, returning it.
    pub fn take_user(&self) -> Option<UserRef> {
        self.bound_user.lock().take()
    }

    /// The bound user, if any.
    pub fn bound_user(&self) -> Option<UserRef> {
        self.bound_user.lock().clone()
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the writer is gone, and
    /// increments the dropped message counter.
    pub fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize `value` and queue it as a text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Frame::from(json)),
            Err(_) => false,
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a transport pong.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Whether the peer answered since the last sweep, without resetting.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Read and clear the alive flag.
    ///
    /// Returns `true` if the peer answered since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Queue a close frame behind whatever is already pending.
    ///
    /// If the queue is full the socket is terminated instead, since a
    /// closing connection accepts no further traffic.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::Relaxed) && !self.send(Frame::Close) {
            warn!(conn_id = %self.id, "outbound queue full, terminating instead of closing");
            self.terminate();
        }
    }

    /// Drop the socket immediately.
    pub fn terminate(&self) {
        self.closing.store(true, Ordering::Relaxed);
        self.terminated.cancel();
    }

    /// Token cancelled by [`terminate`](Self::terminate).
    pub fn termination(&self) -> CancellationToken {
        self.terminated.clone()
    }

    /// Open means: not closing, not terminated, and the writer still runs.
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Relaxed)
            && !self.terminated.is_cancelled()
            && !self.tx.is_closed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("bound_user", &self.bound_user())
            .field("is_alive", &self.is_alive())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
