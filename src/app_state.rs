//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ws::registry::Registry;
use crate::ws::router::EventRouter;
use crate::ws::session::{SessionConfig, SessionHandle};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live sessions, used for broadcast.
    pub registry: Arc<Registry>,
    /// Dispatch table for inbound envelopes.
    pub router: Arc<EventRouter<ServerContext>>,
    /// Keepalive and framing parameters for new sessions.
    pub session_config: SessionConfig,
    /// Fired on process shutdown; every session then writes a close frame.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds the state from its parts.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        router: EventRouter<ServerContext>,
        session_config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            router: Arc::new(router),
            session_config,
            shutdown,
        }
    }
}

/// Context handed to coordinator-side event handlers.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// The session the envelope arrived on.
    pub session: SessionHandle,
    /// All live sessions.
    pub registry: Arc<Registry>,
}
