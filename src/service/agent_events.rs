//! Agent event handlers.

use crate::domain::event_types::{self, StampedTestMessage};
use crate::domain::Envelope;
use crate::error::RelayError;
use crate::ws::router::EventRouter;
use crate::ws::session::SessionHandle;

/// Builds the agent's dispatch table.
#[must_use]
pub fn build_router() -> EventRouter<SessionHandle> {
    let mut router = EventRouter::new();
    router
        .register(event_types::TEST, log_test_message)
        .register(event_types::BUILD_EVENT, log_build_event);
    router
}

/// Logs a `test` broadcast from the coordinator.
///
/// # Errors
///
/// Returns [`RelayError::Handler`] if the payload is not a stamped test
/// message.
pub async fn log_test_message(
    envelope: Envelope,
    session: SessionHandle,
) -> Result<(), RelayError> {
    let message: StampedTestMessage = envelope
        .decode_payload()
        .map_err(|err| RelayError::Handler(format!("bad test payload: {err}")))?;
    tracing::info!(
        session_id = %session.id(),
        from = %message.inner.from,
        message = %message.inner.message,
        sent = %message.sent,
        "received message from server"
    );
    Ok(())
}

/// Logs a build approval event. The payload is passed through untouched.
///
/// # Errors
///
/// Never fails.
pub async fn log_build_event(envelope: Envelope, session: SessionHandle) -> Result<(), RelayError> {
    tracing::info!(
        session_id = %session.id(),
        payload = envelope.raw_payload(),
        "received build event"
    );
    Ok(())
}
