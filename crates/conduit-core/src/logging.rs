//! Logging setup for hosts embedding connectors.
//!
//! Connectors only emit `tracing` events. Hosts that do not install their own
//! subscriber can call [`init_logging`].

/// Environment variable switching to JSON formatted logs.
pub const LOG_JSON_ENV: &str = "CONDUIT_LOG_JSON";

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "conduit=info";

/// Install a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise [`DEFAULT_FILTER`]
/// plus warnings from everything else. Returns `false` when a subscriber was
/// already installed.
pub fn init_logging() -> bool {
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)
            .add_directive(tracing::Level::WARN.into())
    });

    let result = if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init()
    };

    result.is_ok()
}
