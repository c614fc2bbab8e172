//! Agent reconnect supervisor.
//!
//! [`Agent::run`] owns the logical connection to the coordinator. Each
//! iteration dials a fresh transport, runs one [`Session`] on it to
//! completion and then dials again. A session is fully torn down before
//! the next dial, so at most one transport is alive at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connector::Connector;
use super::producer::Producer;
use super::retry::{RetryPolicy, RetryState};
use crate::error::RelayError;
use crate::ws::connection::{Role, Session};
use crate::ws::router::EventRouter;
use crate::ws::session::{SessionConfig, SessionHandle};

/// Client-side owner of the connection to the coordinator.
#[derive(Debug)]
pub struct Agent<C> {
    connector: C,
    identity: String,
    router: Arc<EventRouter<SessionHandle>>,
    session_config: SessionConfig,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    producer: Option<Arc<dyn Producer>>,
    current: watch::Sender<Option<SessionHandle>>,
}

impl<C: Connector> Agent<C> {
    /// Creates an agent with default session settings and retry policy.
    #[must_use]
    pub fn new(
        connector: C,
        identity: impl Into<String>,
        router: EventRouter<SessionHandle>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            connector,
            identity: identity.into(),
            router: Arc::new(router),
            session_config: SessionConfig::default(),
            retry: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
            producer: None,
            current,
        }
    }

    /// Sets keepalive and framing parameters for every session.
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the delay schedule between failed connection attempts.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the token that stops the agent.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Spawns `producer` on every session once it opens.
    #[must_use]
    pub fn with_producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Watches the handle of the current session, if any.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionHandle>> {
        self.current.subscribe()
    }

    /// Connects, runs sessions and reconnects until shut down.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RetriesExhausted`] once the retry policy's
    /// attempt cap is hit.
    pub async fn run(self) -> Result<(), RelayError> {
        let mut retry = self.retry.start();

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let connected = tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                connected = self.connector.connect() => connected,
            };

            let transport = match connected {
                Ok(transport) => transport,
                Err(err) => {
                    if !self.back_off(&mut retry, &err.to_string()).await? {
                        return Ok(());
                    }
                    continue;
                }
            };

            let (handle, outbound) = SessionHandle::new(self.identity.clone(), None);
            self.current.send_replace(Some(handle.clone()));

            let producer = self
                .producer
                .as_ref()
                .map(|producer| tokio::spawn(producer.run(handle.clone())));

            let opened = Instant::now();
            let outcome = Session::new(
                handle.clone(),
                outbound,
                transport,
                Arc::clone(&self.router),
                handle.clone(),
            )
            .with_config(self.session_config)
            .with_role(Role::Initiator)
            .with_shutdown(self.shutdown.clone())
            .run()
            .await;

            if let Some(producer) = producer {
                producer.abort();
            }
            self.current.send_replace(None);

            if outcome.is_shutdown() || self.shutdown.is_cancelled() {
                tracing::info!(session_id = %handle.id(), "agent stopped");
                return Ok(());
            }

            let lived = opened.elapsed();
            if lived >= self.retry.min_stable {
                retry.reset();
                tracing::info!(
                    session_id = %handle.id(),
                    read = ?outcome.read,
                    write = ?outcome.write,
                    "reconnect to server"
                );
            } else {
                tracing::warn!(
                    session_id = %handle.id(),
                    lived_ms = millis(lived),
                    read = ?outcome.read,
                    "session closed before it was stable"
                );
                if !self.back_off(&mut retry, "session closed early").await? {
                    return Ok(());
                }
            }
        }
    }

    /// Records a failed attempt and sleeps for its delay.
    ///
    /// Returns `Ok(false)` if shutdown fired while waiting.
    async fn back_off(&self, retry: &mut RetryState, cause: &str) -> Result<bool, RelayError> {
        let attempt = retry.failures().saturating_add(1);
        let Some(delay) = retry.next_delay() else {
            tracing::error!(attempt, cause, "giving up on server");
            return Err(RelayError::RetriesExhausted { attempts: attempt });
        };
        tracing::warn!(attempt, delay_ms = millis(delay), cause, "retrying server");
        tokio::select! {
            () = self.shutdown.cancelled() => Ok(false),
            () = tokio::time::sleep(delay) => Ok(true),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::ws::frame::{Frame, Transport};
    use crate::ws::session::SessionState;
    use crate::ws::testing::{PeerEnd, channel_transport_with};

    /// Counts transports alive at the same time.
    #[derive(Debug, Clone, Default)]
    struct Liveness {
        live: Arc<AtomicUsize>,
        max_live: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct LiveGuard(Liveness);

    impl LiveGuard {
        fn new(liveness: &Liveness) -> Self {
            let now = liveness.live.fetch_add(1, Ordering::SeqCst) + 1;
            liveness.max_live.fetch_max(now, Ordering::SeqCst);
            Self(liveness.clone())
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Refuses the first `fail_first` dials, then hands out channel
    /// transports whose far ends go to `peers`.
    #[derive(Debug)]
    struct MockConnector {
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
        liveness: Liveness,
        peers: mpsc::UnboundedSender<PeerEnd>,
    }

    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Transport, RelayError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(RelayError::Connect("connection refused".to_string()));
            }
            let (transport, peer) = channel_transport_with(LiveGuard::new(&self.liveness));
            let _ = self.peers.send(peer);
            Ok(transport)
        }
    }

    struct Harness {
        agent: Agent<MockConnector>,
        attempts: Arc<AtomicUsize>,
        liveness: Liveness,
        peers: mpsc::UnboundedReceiver<PeerEnd>,
        shutdown: CancellationToken,
    }

    fn harness(fail_first: usize, retry: RetryPolicy) -> Harness {
        let attempts = Arc::new(AtomicUsize::new(0));
        let liveness = Liveness::default();
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let connector = MockConnector {
            attempts: Arc::clone(&attempts),
            fail_first,
            liveness: liveness.clone(),
            peers: peers_tx,
        };
        let agent = Agent::new(connector, "agent-1", EventRouter::new())
            .with_retry(retry)
            .with_shutdown(shutdown.clone());
        Harness {
            agent,
            attempts,
            liveness,
            peers,
            shutdown,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_attempts: None,
            min_stable: Duration::ZERO,
        }
    }

    /// Drops every transport's far end as soon as it is handed out.
    fn drop_peers(mut peers: mpsc::UnboundedReceiver<PeerEnd>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(peer) = peers.recv().await {
                drop(peer);
            }
        })
    }

    async fn wait_open(current: &mut watch::Receiver<Option<SessionHandle>>) -> SessionHandle {
        let Ok(guard) = current.wait_for(Option::is_some).await else {
            panic!("agent dropped");
        };
        let Some(handle) = guard.clone() else {
            panic!("no session");
        };
        drop(guard);
        let mut state = handle.subscribe_state();
        let Ok(_) = state.wait_for(|s| *s >= SessionState::Open).await else {
            panic!("state channel closed");
        };
        handle
    }

    #[tokio::test]
    async fn opens_after_k_failures() {
        let Harness {
            agent,
            attempts,
            liveness,
            mut peers,
            shutdown,
        } = harness(3, fast_retry());
        let mut current = agent.subscribe();
        let task = tokio::spawn(agent.run());

        let handle = wait_open(&mut current).await;
        assert_eq!(handle.identity(), "agent-1");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(liveness.max_live.load(Ordering::SeqCst), 1);

        let Some(mut peer) = peers.recv().await else {
            panic!("no transport handed out");
        };
        shutdown.cancel();
        let Ok(result) = task.await else {
            panic!("agent panicked");
        };
        assert!(result.is_ok());
        assert_eq!(peer.next_data().await, Some(Frame::close_normal()));
        assert_eq!(liveness.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let Harness { agent, attempts, .. } =
            harness(usize::MAX, fast_retry().with_max_attempts(3));

        let result = agent.run().await;
        assert!(matches!(result, Err(RelayError::RetriesExhausted { attempts: 3 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn server_drop_triggers_one_reconnect() {
        let Harness {
            agent,
            attempts,
            liveness,
            mut peers,
            shutdown,
        } = harness(0, fast_retry());
        let mut current = agent.subscribe();
        let task = tokio::spawn(agent.run());

        let first = wait_open(&mut current).await;
        let Some(peer) = peers.recv().await else {
            panic!("no transport handed out");
        };
        drop(peer.inbound);

        let Some(_second_peer) = peers.recv().await else {
            panic!("agent did not reconnect");
        };
        let second = wait_open(&mut current).await;
        assert_ne!(first.id(), second.id());
        assert_eq!(first.state(), SessionState::Closed);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(liveness.max_live.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        let Ok(result) = task.await else {
            panic!("agent panicked");
        };
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_while_retrying_returns() {
        let retry = RetryPolicy {
            initial_interval: Duration::from_secs(3600),
            max_interval: Duration::from_secs(3600),
            ..fast_retry()
        };
        let Harness { agent, shutdown, .. } = harness(usize::MAX, retry);
        let task = tokio::spawn(agent.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        let Ok(result) = task.await else {
            panic!("agent panicked");
        };
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn producer_runs_on_each_session() {
        #[derive(Debug)]
        struct Hello;

        impl Producer for Hello {
            fn run(&self, session: SessionHandle) -> futures_util::future::BoxFuture<'static, ()> {
                Box::pin(async move {
                    session.send(Frame::Text("hello".to_string()));
                })
            }
        }

        let Harness {
            agent,
            mut peers,
            shutdown,
            ..
        } = harness(0, fast_retry());
        let task = tokio::spawn(agent.with_producer(Arc::new(Hello)).run());

        let Some(mut peer) = peers.recv().await else {
            panic!("no transport handed out");
        };
        assert_eq!(peer.next_data().await, Some(Frame::Text("hello".to_string())));

        shutdown.cancel();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn short_sessions_count_as_failures() {
        let retry = RetryPolicy {
            min_stable: Duration::from_secs(3600),
            ..fast_retry()
        }
        .with_max_attempts(3);
        let Harness {
            agent,
            attempts,
            peers,
            ..
        } = harness(0, retry);
        let dropper = drop_peers(peers);

        let result = agent.run().await;
        assert!(matches!(result, Err(RelayError::RetriesExhausted { attempts: 3 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        dropper.abort();
    }

    #[tokio::test]
    async fn stable_sessions_reset_the_schedule() {
        let Harness {
            agent,
            attempts,
            peers,
            shutdown,
            ..
        } = harness(0, fast_retry().with_max_attempts(1));
        let dropper = drop_peers(peers);
        let task = tokio::spawn(agent.run());

        let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
            while attempts.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(reconnected.is_ok(), "agent stopped reconnecting");

        shutdown.cancel();
        let Ok(result) = task.await else {
            panic!("agent panicked");
        };
        assert!(result.is_ok());
        dropper.abort();
    }
}
