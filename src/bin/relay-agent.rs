//! relay-agent entry point.
//!
//! Dials the coordinator, keeps the connection alive across failures and
//! optionally produces periodic test traffic.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relay_gateway::agent::{Agent, TestMessageProducer, WsConnector};
use relay_gateway::config::AgentConfig;
use relay_gateway::service::agent_events;
use relay_gateway::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env()?;
    telemetry::init_tracing(config.log_json)?;
    tracing::info!(
        server = %config.server_address,
        identity = %config.identification,
        environment = %config.environment,
        "starting relay-agent"
    );

    let shutdown = CancellationToken::new();
    let connector = WsConnector::new(
        config.server_address.clone(),
        config.identification.clone(),
        config.session.max_frame_size,
    );
    let router = agent_events::build_router();
    let mut agent = Agent::new(connector, config.identification.clone(), router)
        .with_session_config(config.session)
        .with_retry(config.retry)
        .with_shutdown(shutdown.clone());
    if config.producer_enabled {
        agent = agent.with_producer(Arc::new(TestMessageProducer::new(
            config.producer_interval,
            config.producer_duration,
            config.environment.clone(),
        )));
    }

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("interrupt");
        interrupt.cancel();
    });

    agent.run().await?;
    tracing::info!("agent stopped");
    Ok(())
}
