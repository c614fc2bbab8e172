//! Type-tag dispatch table shared by both connection roles.
//!
//! An [`EventRouter`] is built once at startup, wrapped in an `Arc` and
//! handed to every session. Registration needs `&mut self`, so the table
//! cannot change while sessions are looking handlers up.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::domain::Envelope;
use crate::error::RelayError;

/// Future returned by a registered handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), RelayError>>;

type Handler<C> = Arc<dyn Fn(Envelope, C) -> HandlerFuture + Send + Sync>;

/// Maps envelope type tags to async handlers.
///
/// `C` is the per-session context handed to every handler: the coordinator
/// passes its session plus the registry, the agent just its session.
pub struct EventRouter<C> {
    routes: HashMap<String, Handler<C>>,
}

impl<C: Send + 'static> EventRouter<C> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registers `handler` for `event_type`. A later registration for the
    /// same tag replaces the earlier one.
    pub fn register<F, Fut>(&mut self, event_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Envelope, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        let handler: Handler<C> = Arc::new(move |envelope: Envelope, ctx: C| -> HandlerFuture {
            Box::pin(handler(envelope, ctx))
        });
        self.routes.insert(event_type.into(), handler);
        self
    }

    /// Dispatches `envelope` to the handler registered for its type and
    /// waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnsupportedEvent`] when no handler matches,
    /// or whatever error the handler itself returns.
    pub async fn route(&self, envelope: Envelope, ctx: C) -> Result<(), RelayError> {
        let Some(handler) = self.routes.get(envelope.event_type()) else {
            return Err(RelayError::UnsupportedEvent(envelope.event_type().to_owned()));
        };
        handler(envelope, ctx).await
    }

    /// Returns `true` if a handler is registered for `event_type`.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Number of registered type tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<C: Send + 'static> Default for EventRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventRouter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("EventRouter").field("routes", &types).finish()
    }
}
