use topic_signup_config::LogConfig;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

pub const DEFAULT_LOG_LEVEL: &str = "info,topic_signup_core=debug,topic_signup_database=debug";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("tracing subscriber could not be installed: {0}")]
    Init(#[from] TryInitError),
}

/// `RUST_LOG` wins over the configured filter, which wins over
/// [`DEFAULT_LOG_LEVEL`].
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env().or_else(|_| configured_filter(config.filter.as_deref()))
}

fn configured_filter(filter: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    Ok(EnvFilter::try_new(filter.unwrap_or(DEFAULT_LOG_LEVEL))?)
}

pub fn setup_telemetry(config: &LogConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let stdout_log = tracing_subscriber::fmt::layer().with_ansi(config.ansi);

    tracing_subscriber::registry()
        .with(stdout_log.with_filter(filter))
        .try_init()?;
    tracing::debug!("telemetry installed");
    Ok(())
}

/// Captured by the test harness; a second call is a no-op.
pub fn setup_test_telemetry() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .with_test_writer()
        .try_init();
}
