//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::EngineError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), EngineError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = match (config.json, config.timestamps) {
        (true, true) => tracing_subscriber::fmt::layer().json().boxed(),
        (true, false) => tracing_subscriber::fmt::layer().json().without_time().boxed(),
        (false, true) => tracing_subscriber::fmt::layer().boxed(),
        (false, false) => tracing_subscriber::fmt::layer().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| EngineError::Telemetry(e.to_string()))
}
