//! Error types for sessions, routing and the agent supervisor.
//!
//! [`RelayError`] is the central error type of the crate. Transport-level
//! failures are carried by the narrower [`TransportError`], which is what
//! the frame adapters in [`crate::ws::frame`] produce.

/// Failure reported by the underlying WebSocket transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport was already closed.
    #[error("transport closed")]
    Closed,

    /// I/O failure on the socket.
    #[error("transport i/o error: {0}")]
    Io(String),

    /// WebSocket protocol violation (bad frame, oversized message, ...).
    #[error("websocket protocol error: {0}")]
    Protocol(String),
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Io(io) => Self::Io(io.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Crate-wide error enum.
///
/// # Severity
///
/// | Variant                         | Effect on the session        |
/// |---------------------------------|------------------------------|
/// | `Transport`, `ReadTimeout`, `FrameTooLarge` | terminal             |
/// | `Decode`, `InvalidEnvelope`     | depends on decode policy     |
/// | `UnsupportedEvent`, `Handler`   | reported, session continues  |
/// | `Connect`, `RetriesExhausted`   | agent supervisor only        |
/// | `Config`                        | startup only                 |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No handler registered for the envelope's type tag.
    #[error("this event type is not supported: {0}")]
    UnsupportedEvent(String),

    /// The frame parsed as JSON but is not a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A registered handler failed.
    #[error("handler error: {0}")]
    Handler(String),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No keepalive acknowledgment arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,

    /// An inbound data frame exceeded the configured limit.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Dialing the coordinator failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The retry policy gave up.
    #[error("giving up after {attempts} connection attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}
