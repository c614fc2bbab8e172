//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use super::connection::{Role, Session};
use super::frame::Transport;
use super::session::SessionHandle;
use crate::app_state::{AppState, ServerContext};

/// Request header carrying the peer's opaque identity.
pub const IDENTIFICATION_HEADER: &str = "identification";

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
///
/// The `identification` header is stored as the session identity; it is
/// not validated.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let identity = headers
        .get(IDENTIFICATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let limit = state.session_config.max_frame_size;

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_session(socket, state, identity, remote_addr))
}

/// Registers the session, runs it, and removes it once both loops exit.
async fn serve_session(
    socket: WebSocket,
    state: AppState,
    identity: String,
    remote_addr: SocketAddr,
) {
    let (handle, outbound) = SessionHandle::new(identity, Some(remote_addr));
    state.registry.add(handle.clone()).await;

    let ctx = ServerContext {
        session: handle.clone(),
        registry: Arc::clone(&state.registry),
    };
    let outcome = Session::new(
        handle.clone(),
        outbound,
        Transport::from_axum(socket),
        Arc::clone(&state.router),
        ctx,
    )
    .with_config(state.session_config)
    .with_role(Role::Responder)
    .with_shutdown(state.shutdown.clone())
    .run()
    .await;

    state.registry.remove(&handle).await;
    tracing::debug!(session_id = %handle.id(), ?outcome, "session finished");
}
