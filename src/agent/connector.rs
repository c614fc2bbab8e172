//! Outbound dialing.
//!
//! The [`Connector`] trait is the seam between the reconnect supervisor
//! and the network; [`WsConnector`] is the real implementation.

use std::future::Future;

use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::RelayError;
use crate::ws::frame::Transport;
use crate::ws::handler::IDENTIFICATION_HEADER;

/// Produces a fresh transport to the coordinator on every call.
pub trait Connector: Send + Sync {
    /// Dials once.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] if the coordinator is unreachable
    /// or refuses the upgrade.
    fn connect(&self) -> impl Future<Output = Result<Transport, RelayError>> + Send;
}

/// Dials a `ws://` or `wss://` URL with the identification header attached.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    identity: String,
    max_frame_size: usize,
}

impl WsConnector {
    /// Creates a connector for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, identity: impl Into<String>, max_frame_size: usize) -> Self {
        Self {
            url: url.into(),
            identity: identity.into(),
            max_frame_size,
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, RelayError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| {
                RelayError::Connect(format!("invalid server address {}: {err}", self.url))
            })?;
        let identity = HeaderValue::from_str(&self.identity)
            .map_err(|err| RelayError::Config(format!("invalid identification header: {err}")))?;
        request.headers_mut().insert(IDENTIFICATION_HEADER, identity);

        let config = WebSocketConfig::default()
            .max_message_size(Some(self.max_frame_size))
            .max_frame_size(Some(self.max_frame_size));
        let (socket, response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|err| RelayError::Connect(err.to_string()))?;

        tracing::debug!(url = %self.url, status = %response.status(), "connected to server");
        Ok(Transport::from_tungstenite(socket))
    }
}
