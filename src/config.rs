//! Configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable optional values
//! fall back to their defaults; required values and structurally invalid
//! ones are reported as [`RelayError::Config`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::retry::RetryPolicy;
use crate::error::RelayError;
use crate::ws::registry::BroadcastStrategy;
use crate::ws::session::{DecodeErrorPolicy, SessionConfig};

/// Frame limit applied by the coordinator.
pub const SERVER_MAX_FRAME_SIZE: usize = 819_200;

/// Coordinator configuration.
///
/// Loaded once at startup via [`ServerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,
    /// Keepalive and framing parameters for every session.
    pub session: SessionConfig,
    /// How broadcast iterates over the registry.
    pub broadcast_strategy: BroadcastStrategy,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `LISTEN_ADDR`,
    /// `BROADCAST_STRATEGY` or `DECODE_ERROR_POLICY` is set but invalid.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|err| RelayError::Config(format!("LISTEN_ADDR: {err}")))?;

        Ok(Self {
            listen_addr,
            session: session_config(&lookup, SERVER_MAX_FRAME_SIZE)?,
            broadcast_strategy: parse_env_strict(&lookup, "BROADCAST_STRATEGY")?
                .unwrap_or_default(),
            log_json: log_json(&lookup),
        })
    }
}

/// Agent configuration.
///
/// Loaded once at startup via [`AgentConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Coordinator WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub server_address: String,
    /// Sent in the `identification` header.
    pub identification: String,
    /// Used as the `from` field of produced traffic.
    pub environment: String,
    /// Keepalive and framing parameters for every session.
    pub session: SessionConfig,
    /// Delay schedule between failed connection attempts.
    pub retry: RetryPolicy,
    /// Whether to run the test message producer.
    pub producer_enabled: bool,
    /// Time between two produced messages.
    pub producer_interval: Duration,
    /// How long the producer runs per session.
    pub producer_duration: Duration,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl AgentConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `SERVER_ADDRESS` is missing, if
    /// `PONG_WAIT_SECS` or `PRODUCER_INTERVAL_SECS` is zero, or if
    /// `DECODE_ERROR_POLICY` is set but invalid.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let server_address = lookup("SERVER_ADDRESS")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| RelayError::Config("SERVER_ADDRESS is required".to_string()))?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            initial_interval: Duration::from_millis(parse_env(&lookup, "RETRY_INITIAL_MS", 500)),
            max_interval: Duration::from_millis(parse_env(&lookup, "RETRY_MAX_MS", 30_000)),
            randomization_factor: parse_env(&lookup, "RETRY_JITTER", defaults.randomization_factor),
            multiplier: parse_env(&lookup, "RETRY_MULTIPLIER", defaults.multiplier),
            max_attempts: lookup("RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()),
            min_stable: Duration::from_secs(parse_env(
                &lookup,
                "RETRY_MIN_STABLE_SECS",
                defaults.min_stable.as_secs(),
            )),
        };

        let producer_interval = parse_env(&lookup, "PRODUCER_INTERVAL_SECS", 5);
        if producer_interval == 0 {
            return Err(RelayError::Config(
                "PRODUCER_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            server_address,
            identification: lookup("IDENTIFICATION").unwrap_or_default(),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()),
            session: session_config(&lookup, SessionConfig::DEFAULT_MAX_FRAME_SIZE)?,
            retry,
            producer_enabled: parse_env_bool(&lookup, "PRODUCER_ENABLED", true),
            producer_interval: Duration::from_secs(producer_interval),
            producer_duration: Duration::from_secs(parse_env(
                &lookup,
                "PRODUCER_DURATION_SECS",
                120,
            )),
            log_json: log_json(&lookup),
        })
    }
}

fn session_config(
    lookup: &impl Fn(&str) -> Option<String>,
    default_max_frame_size: usize,
) -> Result<SessionConfig, RelayError> {
    let pong_wait = parse_env(lookup, "PONG_WAIT_SECS", SessionConfig::DEFAULT_PONG_WAIT.as_secs());
    if pong_wait == 0 {
        return Err(RelayError::Config("PONG_WAIT_SECS must be positive".to_string()));
    }
    let max_frame_size = parse_env(lookup, "MAX_FRAME_SIZE", default_max_frame_size);
    let policy: DecodeErrorPolicy =
        parse_env_strict(lookup, "DECODE_ERROR_POLICY")?.unwrap_or_default();

    Ok(SessionConfig::new(Duration::from_secs(pong_wait), max_frame_size)
        .with_decode_error_policy(policy))
}

fn log_json(lookup: &impl Fn(&str) -> Option<String>) -> bool {
    lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses an enum-like variable; unlike [`parse_env`] an invalid value is
/// an error rather than silently defaulted.
fn parse_env_strict<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RelayError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|v| v.parse().map_err(|err| RelayError::Config(format!("{key}: {err}"))))
        .transpose()
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
