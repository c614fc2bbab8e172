//! Coordinator event handlers.

use chrono::Utc;

use crate::app_state::ServerContext;
use crate::domain::event_types::{self, StampedTestMessage, TestMessage};
use crate::domain::Envelope;
use crate::error::RelayError;
use crate::ws::router::EventRouter;

/// Body of the message the coordinator broadcasts in reply to `test`.
pub const SERVER_TEST_MESSAGE: &str = "test message from server.";

/// Builds the coordinator's dispatch table.
#[must_use]
pub fn build_router() -> EventRouter<ServerContext> {
    let mut router = EventRouter::new();
    router.register(event_types::TEST, broadcast_test_message);
    router
}

/// Re-broadcasts a `test` event to every session, sender included, keeping
/// the sender's `from` and stamping the send time.
///
/// # Errors
///
/// Returns [`RelayError::Handler`] if the payload is not a
/// [`TestMessage`].
pub async fn broadcast_test_message(
    envelope: Envelope,
    ctx: ServerContext,
) -> Result<(), RelayError> {
    let incoming: TestMessage = envelope
        .decode_payload()
        .map_err(|err| RelayError::Handler(format!("bad payload in request: {err}")))?;

    let outgoing = StampedTestMessage {
        inner: TestMessage {
            message: SERVER_TEST_MESSAGE.to_string(),
            from: incoming.from,
        },
        sent: Utc::now(),
    };
    let reply = Envelope::new(event_types::TEST, &outgoing)?;
    let delivered = ctx.registry.broadcast(&reply).await?;

    tracing::debug!(
        session_id = %ctx.session.id(),
        from = %outgoing.inner.from,
        delivered,
        "broadcast test message"
    );
    Ok(())
}
