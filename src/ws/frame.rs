//! Transport-neutral WebSocket frames and the boxed transport halves.
//!
//! The coordinator receives sockets from axum's upgrade extractor while the
//! agent dials out with `tokio-tungstenite`. Both are adapted here into the
//! same [`Transport`] so that the session loops in
//! [`crate::ws::connection`] are written once.

use std::fmt;
use std::pin::Pin;

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::error::TransportError;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent by an endpoint that is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Numeric close code (RFC 6455 §7.4).
    pub code: u16,
    /// Optional human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Normal closure with an empty reason.
    #[must_use]
    pub fn normal() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: String::new(),
        }
    }

    /// Returns `true` for codes that signal an orderly shutdown.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
    }
}

/// One WebSocket frame as seen by the session loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text data frame carrying one encoded envelope.
    Text(String),
    /// Binary data frame carrying one encoded envelope.
    Binary(Vec<u8>),
    /// Keepalive request.
    Ping(Vec<u8>),
    /// Keepalive acknowledgment.
    Pong(Vec<u8>),
    /// Close handshake, optionally with a code.
    Close(Option<CloseReason>),
}

impl Frame {
    /// Close frame with code 1000.
    #[must_use]
    pub fn close_normal() -> Self {
        Self::Close(Some(CloseReason::normal()))
    }
}

/// Write half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Read half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An established, exclusively owned bidirectional connection.
///
/// The sink goes to the session's writer task and the stream to its reader
/// task; nothing else ever touches either half.
pub struct Transport {
    /// Write half.
    pub sink: FrameSink,
    /// Read half.
    pub stream: FrameStream,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Boxes an arbitrary sink/stream pair.
    pub fn new<Tx, Rx>(sink: Tx, stream: Rx) -> Self
    where
        Tx: Sink<Frame, Error = TransportError> + Send + 'static,
        Rx: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Adapts a socket accepted through axum's upgrade extractor.
    #[must_use]
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_axum(frame))));
        let stream = stream.map(|msg| msg.map(from_axum).map_err(TransportError::from));
        Self::new(sink, stream)
    }

    /// Adapts a socket dialed with `tokio-tungstenite`.
    #[must_use]
    pub fn from_tungstenite<S>(socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_tungstenite(frame))));
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_tungstenite(msg).map(Ok),
                Err(err) => Some(Err(TransportError::from(err))),
            })
        });
        Self::new(sink, stream)
    }
}

fn into_axum(frame: Frame) -> AxumMessage {
    match frame {
        Frame::Text(text) => AxumMessage::Text(text.into()),
        Frame::Binary(bytes) => AxumMessage::Binary(bytes.into()),
        Frame::Ping(bytes) => AxumMessage::Ping(bytes.into()),
        Frame::Pong(bytes) => AxumMessage::Pong(bytes.into()),
        Frame::Close(reason) => AxumMessage::Close(reason.map(|r| AxumCloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

fn from_axum(msg: AxumMessage) -> Frame {
    match msg {
        AxumMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        AxumMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        AxumMessage::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        AxumMessage::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        AxumMessage::Close(close) => Frame::Close(close.map(|c| CloseReason {
            code: c.code,
            reason: c.reason.as_str().to_owned(),
        })),
    }
}

fn into_tungstenite(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        Frame::Ping(bytes) => WsMessage::Ping(bytes.into()),
        Frame::Pong(bytes) => WsMessage::Pong(bytes.into()),
        Frame::Close(reason) => WsMessage::Close(reason.map(|r| WsCloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// Raw frames only show up when writing; they are skipped on read.
fn from_tungstenite(msg: WsMessage) -> Option<Frame> {
    match msg {
        WsMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        WsMessage::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        WsMessage::Ping(bytes) => Some(Frame::Ping(bytes.to_vec())),
        WsMessage::Pong(bytes) => Some(Frame::Pong(bytes.to_vec())),
        WsMessage::Close(close) => Some(Frame::Close(close.map(|c| CloseReason {
            code: u16::from(c.code),
            reason: c.reason.as_str().to_owned(),
        }))),
        WsMessage::Frame(_) => None,
    }
}
