//! Session read/write loops.
//!
//! [`Session::run`] spawns one reader and one writer task around a
//! [`Transport`] and waits for both. Whichever loop stops first fires the
//! session's close signal, which unblocks the other one:
//!
//! ```text
//!                 ┌──────────── close signal ───────────┐
//!                 ▼                                      │
//! transport ─▶ read loop ─▶ EventRouter ─▶ handler ─▶ SessionHandle::send
//!                                                        │
//! transport ◀─ write loop ◀── outbound queue ◀───────────┘
//!                 ▲
//!            ping ticker / shutdown
//! ```
//!
//! The writer is the only task that ever writes to the transport. The
//! reader pushes its deadline forward on every pong and fails with
//! [`RelayError::ReadTimeout`] once the liveness window lapses.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::frame::{CLOSE_GOING_AWAY, CloseReason, Frame, FrameSink, FrameStream, Transport};
use super::router::EventRouter;
use super::session::{DecodeErrorPolicy, OutboundQueue, SessionConfig, SessionHandle, SessionState};
use crate::domain::Envelope;
use crate::error::{RelayError, TransportError};

/// Which end of the connection a session sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// The coordinator, which accepted the upgrade.
    #[default]
    Responder,
    /// The agent, which dialed out and owns reconnection.
    Initiator,
}

impl Role {
    /// Close frame written when the process is interrupted.
    fn shutdown_frame(self) -> Frame {
        match self {
            Self::Initiator => Frame::close_normal(),
            Self::Responder => Frame::Close(Some(CloseReason {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down".to_string(),
            })),
        }
    }
}

/// Why the read loop stopped.
#[derive(Debug)]
pub enum ReadExit {
    /// The session's close signal fired.
    Closed,
    /// The peer sent a close frame.
    PeerClosed(Option<CloseReason>),
    /// The stream ended without a close frame.
    Disconnected,
    /// Transport error, read deadline, oversized frame, or a malformed
    /// envelope under [`DecodeErrorPolicy::Terminate`].
    Failed(RelayError),
    /// The reader task panicked.
    Aborted,
}

/// Why the write loop stopped.
#[derive(Debug)]
pub enum WriteExit {
    /// The outbound queue was closed, either by the session's close
    /// signal or because every sender went away, and has been drained.
    QueueClosed,
    /// The process-wide shutdown token fired.
    Shutdown,
    /// A data, ping or close write failed.
    Failed(RelayError),
    /// The writer task panicked.
    Aborted,
}

/// Exit reasons of both loops.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Reader exit.
    pub read: ReadExit,
    /// Writer exit.
    pub write: WriteExit,
}

impl SessionOutcome {
    /// Returns `true` if the session ended because of process shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.write, WriteExit::Shutdown)
    }
}

/// A session ready to run: handle, queue, transport and dispatch table.
#[derive(Debug)]
pub struct Session<C> {
    handle: SessionHandle,
    outbound: OutboundQueue,
    transport: Transport,
    router: Arc<EventRouter<C>>,
    ctx: C,
    config: SessionConfig,
    role: Role,
    shutdown: CancellationToken,
}

impl<C> Session<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Prepares a responder session with default keepalive settings.
    #[must_use]
    pub fn new(
        handle: SessionHandle,
        outbound: OutboundQueue,
        transport: Transport,
        router: Arc<EventRouter<C>>,
        ctx: C,
    ) -> Self {
        Self {
            handle,
            outbound,
            transport,
            router,
            ctx,
            config: SessionConfig::default(),
            role: Role::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets keepalive and framing parameters.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the connection role.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Sets the process-wide shutdown token watched by the writer.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs both loops to completion.
    ///
    /// Returns once the reader and the writer have both exited and the
    /// transport has been dropped; the handle is then
    /// [`SessionState::Closed`].
    pub async fn run(self) -> SessionOutcome {
        let Self {
            handle,
            outbound,
            transport,
            router,
            ctx,
            config,
            role,
            shutdown,
        } = self;
        let Transport { sink, stream } = transport;

        handle.advance(SessionState::Open);
        tracing::info!(
            session_id = %handle.id(),
            identity = handle.identity(),
            ?role,
            "session open"
        );

        let writer = tokio::spawn(write_loop(
            handle.clone(),
            outbound,
            sink,
            config,
            role,
            shutdown,
        ));
        let reader = tokio::spawn(read_loop(handle.clone(), stream, router, ctx, config));

        let (read, write) = tokio::join!(reader, writer);
        let read = read.unwrap_or_else(|err| {
            tracing::error!(session_id = %handle.id(), error = %err, "reader task failed");
            ReadExit::Aborted
        });
        let write = write.unwrap_or_else(|err| {
            tracing::error!(session_id = %handle.id(), error = %err, "writer task failed");
            WriteExit::Aborted
        });

        handle.close();
        handle.advance(SessionState::Closed);
        tracing::info!(session_id = %handle.id(), identity = handle.identity(), "session closed");

        SessionOutcome { read, write }
    }
}

async fn read_loop<C>(
    handle: SessionHandle,
    mut stream: FrameStream,
    router: Arc<EventRouter<C>>,
    ctx: C,
    config: SessionConfig,
) -> ReadExit
where
    C: Clone + Send + Sync + 'static,
{
    let mut deadline = Instant::now() + config.pong_wait;

    let exit = loop {
        let next = tokio::select! {
            () = handle.closed() => break ReadExit::Closed,
            next = time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::warn!(session_id = %handle.id(), "no pong before read deadline");
                break ReadExit::Failed(RelayError::ReadTimeout);
            }
            Ok(None) => {
                tracing::warn!(session_id = %handle.id(), "transport ended without close frame");
                break ReadExit::Disconnected;
            }
            Ok(Some(Err(err))) => {
                tracing::warn!(session_id = %handle.id(), error = %err, "error reading message");
                break ReadExit::Failed(err.into());
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong(_) => {
                tracing::trace!(session_id = %handle.id(), "received pong");
                deadline = Instant::now() + config.pong_wait;
            }
            // Answered by the protocol layer.
            Frame::Ping(_) => {}
            Frame::Close(reason) => {
                match &reason {
                    Some(r) if !r.is_clean() => tracing::warn!(
                        session_id = %handle.id(),
                        code = r.code,
                        reason = %r.reason,
                        "unexpected close from peer"
                    ),
                    _ => tracing::debug!(session_id = %handle.id(), "peer closed session"),
                }
                break ReadExit::PeerClosed(reason);
            }
            Frame::Text(text) => {
                let routed = dispatch(text.as_bytes(), &handle, &router, &ctx, &config).await;
                if let Err(exit) = routed {
                    break exit;
                }
            }
            Frame::Binary(bytes) => {
                if let Err(exit) = dispatch(&bytes, &handle, &router, &ctx, &config).await {
                    break exit;
                }
            }
        }
    };

    handle.close();
    exit
}

/// Decodes one data frame and routes it. `Err` means the read loop must stop.
async fn dispatch<C>(
    bytes: &[u8],
    handle: &SessionHandle,
    router: &EventRouter<C>,
    ctx: &C,
    config: &SessionConfig,
) -> Result<(), ReadExit>
where
    C: Clone + Send + Sync + 'static,
{
    if bytes.len() > config.max_frame_size {
        tracing::warn!(
            session_id = %handle.id(),
            size = bytes.len(),
            limit = config.max_frame_size,
            "frame exceeds read limit"
        );
        return Err(ReadExit::Failed(RelayError::FrameTooLarge {
            size: bytes.len(),
            limit: config.max_frame_size,
        }));
    }

    let envelope = match Envelope::from_slice(bytes) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(session_id = %handle.id(), error = %err, "error decoding message");
            return match config.decode_error_policy {
                DecodeErrorPolicy::Skip => Ok(()),
                DecodeErrorPolicy::Terminate => Err(ReadExit::Failed(err)),
            };
        }
    };

    let event_type = envelope.event_type().to_owned();
    if let Err(err) = router.route(envelope, ctx.clone()).await {
        tracing::warn!(
            session_id = %handle.id(),
            event_type,
            error = %err,
            "error handling message"
        );
    }
    Ok(())
}

async fn write_loop(
    handle: SessionHandle,
    mut outbound: OutboundQueue,
    mut sink: FrameSink,
    config: SessionConfig,
    role: Role,
    shutdown: CancellationToken,
) -> WriteExit {
    let mut ticker = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut draining = false;
    let exit = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    write_close(&mut sink, Frame::close_normal(), &config, &handle).await;
                    break WriteExit::QueueClosed;
                };
                if let Err(err) = write(&mut sink, frame, &config).await {
                    tracing::warn!(session_id = %handle.id(), error = %err, "write failed");
                    break WriteExit::Failed(err);
                }
                tracing::trace!(session_id = %handle.id(), "sent message");
            }
            _ = ticker.tick() => {
                if let Err(err) = write(&mut sink, Frame::Ping(Vec::new()), &config).await {
                    tracing::warn!(session_id = %handle.id(), error = %err, "send ping failed");
                    break WriteExit::Failed(err);
                }
            }
            // Frames already queued are still flushed before the close frame.
            () = handle.closed(), if !draining => {
                outbound.close();
                draining = true;
            }
            () = shutdown.cancelled() => {
                tracing::info!(session_id = %handle.id(), "interrupt received, closing session");
                write_close(&mut sink, role.shutdown_frame(), &config, &handle).await;
                break WriteExit::Shutdown;
            }
        }
    };

    handle.close();
    exit
}

async fn write(
    sink: &mut FrameSink,
    frame: Frame,
    config: &SessionConfig,
) -> Result<(), RelayError> {
    match time::timeout(config.write_wait, sink.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Io("write deadline exceeded".to_string()).into()),
    }
}

/// Best effort: the peer may already be gone.
async fn write_close(
    sink: &mut FrameSink,
    frame: Frame,
    config: &SessionConfig,
    handle: &SessionHandle,
) {
    if let Err(err) = write(sink, frame, config).await {
        tracing::debug!(session_id = %handle.id(), error = %err, "write close");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::ws::testing::{PeerEnd, channel_transport};

    fn envelope_text(event_type: &str, payload: &serde_json::Value) -> Frame {
        let Ok(envelope) = Envelope::new(event_type, payload) else {
            panic!("valid envelope");
        };
        let Ok(text) = envelope.encode() else {
            panic!("encodes");
        };
        Frame::Text(text)
    }

    fn counting_router(event_type: &str) -> (Arc<EventRouter<SessionHandle>>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut router = EventRouter::new();
        router.register(event_type, move |_, _session: SessionHandle| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (Arc::new(router), hits)
    }

    fn spawn_session(
        router: Arc<EventRouter<SessionHandle>>,
        config: SessionConfig,
    ) -> (SessionHandle, PeerEnd, tokio::task::JoinHandle<SessionOutcome>) {
        let (handle, outbound) = SessionHandle::new("test-peer", None);
        let (transport, peer) = channel_transport();
        let session = Session::new(handle.clone(), outbound, transport, router, handle.clone())
            .with_config(config);
        (handle, peer, tokio::spawn(session.run()))
    }

    async fn wait_for_hits(hits: &AtomicUsize, expected: usize) {
        while hits.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn concurrent_senders_never_interleave() {
        let (router, _) = counting_router("unused");
        let (handle, mut peer, task) = spawn_session(router, SessionConfig::default());

        let producers = 8;
        let per_producer = 50;
        let mut joins = Vec::new();
        for p in 0..producers {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                for seq in 0..per_producer {
                    handle.send(Frame::Text(format!("{p}:{seq}")));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for join in joins {
            let Ok(()) = join.await else {
                panic!("producer panicked");
            };
        }

        let mut last_seen: HashMap<usize, usize> = HashMap::new();
        let mut total = 0;
        while total < producers * per_producer {
            let Some(Frame::Text(text)) = peer.next_data().await else {
                panic!("transport closed early");
            };
            let Some((p, seq)) = text.split_once(':') else {
                panic!("frame was split: {text}");
            };
            let (Ok(p), Ok(seq)) = (p.parse::<usize>(), seq.parse::<usize>()) else {
                panic!("frame was corrupted: {text}");
            };
            if let Some(prev) = last_seen.insert(p, seq) {
                assert!(seq > prev, "producer {p} reordered: {prev} then {seq}");
            }
            total += 1;
        }
        assert_eq!(last_seen.len(), producers);

        handle.close();
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.write, WriteExit::QueueClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_times_out_after_one_window() {
        let (router, _) = counting_router("unused");
        let config = SessionConfig::default();
        let started = Instant::now();
        let (handle, mut peer, task) = spawn_session(router, config);

        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        let elapsed = started.elapsed();

        assert!(matches!(outcome.read, ReadExit::Failed(RelayError::ReadTimeout)));
        assert!(elapsed >= config.pong_wait, "timed out early: {elapsed:?}");
        assert!(elapsed < config.pong_wait + Duration::from_secs(1), "timed out late: {elapsed:?}");
        assert_eq!(handle.state(), SessionState::Closed);

        let mut pings = 0;
        while let Ok(frame) = peer.written.try_recv() {
            if matches!(frame, Frame::Ping(_)) {
                pings += 1;
            }
        }
        assert_eq!(pings, 1, "exactly one ping fits in the window");
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_session_alive() {
        let (router, _) = counting_router("unused");
        let (handle, peer, task) = spawn_session(router, SessionConfig::default());

        let PeerEnd { mut written, inbound } = peer;
        let responder = tokio::spawn(async move {
            while let Some(frame) = written.recv().await {
                if let Frame::Ping(data) = frame {
                    let _ = inbound.send(Ok(Frame::Pong(data)));
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.state(), SessionState::Open);

        handle.close();
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.read, ReadExit::Closed));
        responder.abort();
    }

    #[tokio::test]
    async fn unsupported_event_keeps_session_open() {
        let (router, hits) = counting_router("known");
        let (handle, peer, task) = spawn_session(router, SessionConfig::default());

        assert!(peer.push(envelope_text("unknown", &serde_json::json!({}))));
        assert!(peer.push(envelope_text("known", &serde_json::json!({}))));
        wait_for_hits(&hits, 1).await;
        assert_eq!(handle.state(), SessionState::Open);

        handle.close();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn handler_error_keeps_session_open() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut router = EventRouter::new();
        router.register("fail", |_, _: SessionHandle| async {
            Err(RelayError::Handler("nope".to_string()))
        });
        router.register("ok", move |_, _: SessionHandle| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let (handle, peer, task) = spawn_session(Arc::new(router), SessionConfig::default());

        assert!(peer.push(envelope_text("fail", &serde_json::json!(null))));
        assert!(peer.push(envelope_text("ok", &serde_json::json!(null))));
        wait_for_hits(&hits, 1).await;
        assert_eq!(handle.state(), SessionState::Open);

        handle.close();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_by_default() {
        let (router, hits) = counting_router("known");
        let (handle, peer, task) = spawn_session(router, SessionConfig::default());

        assert!(peer.push(Frame::Text("{broken".to_string())));
        assert!(peer.push(envelope_text("known", &serde_json::json!({}))));
        wait_for_hits(&hits, 1).await;

        handle.close();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn malformed_frame_terminates_when_configured() {
        let (router, hits) = counting_router("known");
        let config =
            SessionConfig::default().with_decode_error_policy(DecodeErrorPolicy::Terminate);
        let (_handle, peer, task) = spawn_session(router, config);

        assert!(peer.push(Frame::Text("{broken".to_string())));
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.read, ReadExit::Failed(RelayError::Decode(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_frame_terminates() {
        let (router, _) = counting_router("known");
        let config = SessionConfig::new(Duration::from_secs(10), 16);
        let (_handle, peer, task) = spawn_session(router, config);

        assert!(peer.push(Frame::Binary(vec![b' '; 64])));
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(
            outcome.read,
            ReadExit::Failed(RelayError::FrameTooLarge { size: 64, limit: 16 })
        ));
    }

    #[tokio::test]
    async fn peer_close_ends_both_loops() {
        let (router, _) = counting_router("known");
        let (handle, mut peer, task) = spawn_session(router, SessionConfig::default());

        assert!(peer.push(Frame::close_normal()));
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.read, ReadExit::PeerClosed(Some(ref r)) if r.is_clean()));
        assert!(matches!(outcome.write, WriteExit::QueueClosed));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(peer.next_data().await, Some(Frame::close_normal()));
    }

    #[tokio::test]
    async fn dropped_transport_is_disconnect() {
        let (router, _) = counting_router("known");
        let (_handle, peer, task) = spawn_session(router, SessionConfig::default());

        drop(peer.inbound);
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.read, ReadExit::Disconnected));
    }

    #[tokio::test]
    async fn shutdown_writes_close_frame() {
        let (router, _) = counting_router("known");
        let (handle, outbound) = SessionHandle::new("agent", None);
        let (transport, mut peer) = channel_transport();
        let shutdown = CancellationToken::new();
        let session = Session::new(handle.clone(), outbound, transport, router, handle)
            .with_role(Role::Initiator)
            .with_shutdown(shutdown.clone());
        let task = tokio::spawn(session.run());

        shutdown.cancel();
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(outcome.is_shutdown());
        assert_eq!(peer.next_data().await, Some(Frame::close_normal()));
    }

    #[tokio::test]
    async fn write_failure_ends_session() {
        let (router, _) = counting_router("known");
        let (handle, peer, task) = spawn_session(router, SessionConfig::default());

        drop(peer.written);
        handle.send(Frame::Text("lost".to_string()));
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.write, WriteExit::Failed(RelayError::Transport(_))));
        assert!(matches!(outcome.read, ReadExit::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_write_failure_ends_session() {
        let (router, _) = counting_router("unused");
        let config = SessionConfig::default();
        let started = Instant::now();
        let (_handle, peer, task) = spawn_session(router, config);

        let PeerEnd { written, inbound } = peer;
        drop(written);
        let Ok(outcome) = task.await else {
            panic!("session panicked");
        };
        assert!(matches!(outcome.write, WriteExit::Failed(RelayError::Transport(_))));
        assert!(matches!(outcome.read, ReadExit::Closed));
        assert!(started.elapsed() >= config.ping_interval);
        assert!(started.elapsed() < config.pong_wait);
        drop(inbound);
    }
}
