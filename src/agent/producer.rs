//! Pluggable outbound traffic generators run alongside each agent session.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::time::{self, Instant};

use crate::domain::event_types::{self, StampedTestMessage, TestMessage};
use crate::domain::Envelope;
use crate::ws::session::SessionHandle;

/// Generates envelopes for one session until it closes.
///
/// The supervisor spawns [`Producer::run`] every time a session opens; the
/// returned future should finish once `session` is closed.
pub trait Producer: fmt::Debug + Send + Sync {
    /// Produces traffic on `session`.
    fn run(&self, session: SessionHandle) -> BoxFuture<'static, ()>;
}

/// Periodically sends a `test` event for a bounded time.
#[derive(Debug, Clone)]
pub struct TestMessageProducer {
    /// Time between two messages.
    pub interval: Duration,
    /// Total time to keep producing per session.
    pub duration: Duration,
    /// Value of the `from` field.
    pub from: String,
}

impl TestMessageProducer {
    /// Message body of produced events.
    pub const MESSAGE: &'static str = "This is a test message";

    /// Creates a producer.
    #[must_use]
    pub fn new(interval: Duration, duration: Duration, from: impl Into<String>) -> Self {
        Self {
            interval,
            duration,
            from: from.into(),
        }
    }
}

impl Producer for TestMessageProducer {
    fn run(&self, session: SessionHandle) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            if this.interval.is_zero() {
                tracing::warn!(session_id = %session.id(), "producer interval is zero");
                return;
            }
            let mut ticker = time::interval_at(Instant::now() + this.interval, this.interval);
            let done = time::sleep(this.duration);
            tokio::pin!(done);

            loop {
                tokio::select! {
                    () = &mut done => {
                        tracing::info!(session_id = %session.id(), "producer done");
                        return;
                    }
                    () = session.closed() => return,
                    _ = ticker.tick() => {
                        let message = StampedTestMessage {
                            inner: TestMessage {
                                message: Self::MESSAGE.to_string(),
                                from: this.from.clone(),
                            },
                            sent: Utc::now(),
                        };
                        let sent = Envelope::new(event_types::TEST, &message)
                            .and_then(|envelope| session.send_envelope(&envelope));
                        match sent {
                            Ok(true) => {
                                tracing::debug!(session_id = %session.id(), "produced a message");
                            }
                            Ok(false) => return,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to encode test message");
                            }
                        }
                    }
                }
            }
        })
    }
}
