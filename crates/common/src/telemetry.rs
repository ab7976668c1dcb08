//! Logging setup. Log shipping and metric export backends are out of scope;
//! this crate only wires up local structured logging via `tracing`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::Result;

/// Initialize the global tracing subscriber from observability config.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = Registry::default().with(env_filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }

    Ok(())
}

/// Helper macro for structured event logging with ad hoc fields.
#[macro_export]
macro_rules! log_event {
    ($level:expr, $message:expr, $($key:expr => $value:expr),*) => {
        tracing::event!(
            $level,
            message = $message,
            $($key = ?$value,)*
        );
    };
}

/// Helper macro for structured error logging.
#[macro_export]
macro_rules! log_error {
    ($error:expr, $($key:expr => $value:expr),*) => {
        tracing::error!(
            error = ?$error,
            $($key = ?$value,)*
        );
    };
}
