//! Logging setup built on `tracing-subscriber`.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the binary (or to tests via [`init_minimal_logging`]).

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, SettingsError};

/// Installs a stderr subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Parses a level name as accepted in [`LoggingConfig::level`].
pub fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(SettingsError::InvalidConfiguration(format!(
            "Invalid log level: {other}"
        ))),
    }
}

/// Installs the global subscriber described by `config`, writing to stderr
/// so that command output on stdout stays machine readable.
///
/// # Errors
///
/// `InvalidConfiguration` for an unknown level or format, or when a global
/// subscriber has already been installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::new(level.to_string());

    let result = match config.format.to_lowercase().as_str() {
        "json" => fmt::Subscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init(),
        "text" => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .try_init(),
        other => {
            return Err(SettingsError::InvalidConfiguration(format!(
                "Invalid log format: {other}"
            )))
        }
    };

    result.map_err(|e| {
        SettingsError::InvalidConfiguration(format!(
            "Failed to set global tracing subscriber. Was it already initialized? Error: {e}"
        ))
    })
}
