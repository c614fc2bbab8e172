//! relay-gateway coordinator entry point.
//!
//! Serves the WebSocket upgrade endpoint and the REST API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relay_gateway::api;
use relay_gateway::app_state::AppState;
use relay_gateway::config::ServerConfig;
use relay_gateway::service::server_events;
use relay_gateway::telemetry;
use relay_gateway::ws::registry::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    telemetry::init_tracing(config.log_json)?;
    tracing::info!(addr = %config.listen_addr, "starting relay-gateway");

    let registry = Arc::new(Registry::with_strategy(config.broadcast_strategy));
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::clone(&registry),
        server_events::build_router(),
        config.session,
        shutdown.clone(),
    );
    let app = api::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            let sessions = registry.len().await;
            tracing::info!(sessions, "interrupt received, shutting down");
            shutdown.cancel();
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
