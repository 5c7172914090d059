//! Tracing subscriber setup for the `parley` binary.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to whichever process embeds it.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::toml_config::LoggingConfig;

/// Build the env filter: `RUST_LOG` wins, then the configured level.
pub fn env_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        config.level.clone()
    };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) {
    let filter = env_filter(config, verbose);
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
