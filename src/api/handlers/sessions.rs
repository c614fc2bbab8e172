//! Session listing.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;

/// `GET /sessions` — Live sessions with their identity and peer address.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.members().await)
}

/// Session routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sessions", get(list_sessions))
}
