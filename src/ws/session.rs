//! Per-connection handle: send path, close signal and lifecycle state.
//!
//! A [`SessionHandle`] is the only way other tasks interact with a live
//! session. Frames handed to [`SessionHandle::send`] go onto an unbounded
//! single-consumer queue drained by the session's writer task, which is the
//! one and only caller of the transport's write half.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use crate::domain::{Envelope, SessionId};
use crate::error::RelayError;

/// Receiving end of a session's outbound queue, owned by the writer task.
pub type OutboundQueue = mpsc::UnboundedReceiver<Frame>;

/// Lifecycle of one session object. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Transport not yet handed to the session loops.
    Connecting,
    /// Both loops are running.
    Open,
    /// One loop hit a terminal condition; the other is unwinding.
    Closing,
    /// Both loops have exited. Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What the read loop does with a frame that is not a valid envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrorPolicy {
    /// Log and drop the frame, keep reading.
    #[default]
    Skip,
    /// Treat the frame as fatal and end the session.
    Terminate,
}

impl FromStr for DecodeErrorPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "terminate" => Ok(Self::Terminate),
            other => Err(RelayError::Config(format!(
                "unknown decode error policy: {other}"
            ))),
        }
    }
}

/// Keepalive and framing parameters shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Liveness window: the read deadline is pushed this far ahead on
    /// every pong.
    pub pong_wait: Duration,
    /// Period of outbound pings. Always shorter than `pong_wait`.
    pub ping_interval: Duration,
    /// Upper bound on a single write, including close frames.
    pub write_wait: Duration,
    /// Largest accepted inbound data frame, in bytes.
    pub max_frame_size: usize,
    /// Handling of malformed envelopes.
    pub decode_error_policy: DecodeErrorPolicy,
}

impl SessionConfig {
    /// Default liveness window.
    pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(10);

    /// Default inbound frame limit for agents.
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 102_400;

    /// Builds a config whose ping interval is 9/10 of `pong_wait`.
    #[must_use]
    pub fn new(pong_wait: Duration, max_frame_size: usize) -> Self {
        Self {
            pong_wait,
            ping_interval: pong_wait * 9 / 10,
            write_wait: pong_wait,
            max_frame_size,
            decode_error_policy: DecodeErrorPolicy::default(),
        }
    }

    /// Overrides the ping interval.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] unless `0 < interval < pong_wait`.
    pub fn with_ping_interval(mut self, interval: Duration) -> Result<Self, RelayError> {
        if interval.is_zero() || interval >= self.pong_wait {
            return Err(RelayError::Config(format!(
                "ping interval {interval:?} must be non-zero and shorter than pong wait {:?}",
                self.pong_wait
            )));
        }
        self.ping_interval = interval;
        Ok(self)
    }

    /// Sets the decode error policy.
    #[must_use]
    pub const fn with_decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.decode_error_policy = policy;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PONG_WAIT, Self::DEFAULT_MAX_FRAME_SIZE)
    }
}

#[derive(Debug)]
struct Inner {
    id: SessionId,
    identity: String,
    remote_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Frame>,
    close_signal: CancellationToken,
    closing: AtomicBool,
    state: watch::Sender<SessionState>,
}

/// Cheaply cloneable reference to one live session.
///
/// Equality and hashing go by [`SessionId`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Creates a handle in [`SessionState::Connecting`] together with the
    /// receiving end of its outbound queue.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, OutboundQueue) {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connecting);
        let handle = Self {
            inner: Arc::new(Inner {
                id: SessionId::new(),
                identity: identity.into(),
                remote_addr,
                outbound,
                close_signal: CancellationToken::new(),
                closing: AtomicBool::new(false),
                state,
            }),
        };
        (handle, queue)
    }

    /// Unique id of this session.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Opaque identity supplied by the peer at connect time.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Peer address, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Enqueues a frame for the writer task.
    ///
    /// Returns `false` when the session is closing and the frame was
    /// dropped.
    pub fn send(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.outbound.send(frame).is_ok()
    }

    /// Encodes an envelope and enqueues it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if the envelope cannot be encoded.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<bool, RelayError> {
        Ok(self.send(Frame::Text(envelope.encode()?)))
    }

    /// Starts tearing the session down.
    ///
    /// Only the first call has an effect; it returns `true`.
    pub fn close(&self) -> bool {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.advance(SessionState::Closing);
        self.inner.close_signal.cancel();
        true
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Resolves when the session has been asked to close.
    pub async fn closed(&self) {
        self.inner.close_signal.cancelled().await;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn advance(&self, next: SessionState) {
        self.inner.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SessionHandle {}

impl Hash for SessionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}
