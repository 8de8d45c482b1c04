//! Tracing subscriber setup for the binary
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the application. Logs go to stderr so command output on stdout stays clean.

use clap::ValueEnum;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install a global tracing subscriber
///
/// The filter comes from `RUST_LOG` and falls back to `default_level`.
pub fn init(format: LogFormat, default_level: LevelFilter) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Install(err.to_string()))
}
