//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so a single run can
//! be made more verbose without editing the configuration file.

use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationConfig, LogFormat};

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the filter: `RUST_LOG` if set and valid, else `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber described by `application`.
pub fn init_from_config(application: &ApplicationConfig) -> Result<(), InitError> {
    init(&application.log_level, application.log_format)
}

/// Install a global subscriber with the given level and format.
pub fn init(level: &str, format: LogFormat) -> Result<(), InitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    }
}
