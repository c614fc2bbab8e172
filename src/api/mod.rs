//! HTTP layer: REST handlers and application router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! `/ws` upgrade live at the root.

pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the REST router.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the complete application: REST, WebSocket upgrade and layers.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the upgrade handler reads the peer address.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
