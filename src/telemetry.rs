//! Tracing subscriber setup shared by both binaries.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. With `json` set, every
/// event is written as one JSON object per line.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().finish().try_init()
    } else {
        builder.finish().try_init()
    }
}
