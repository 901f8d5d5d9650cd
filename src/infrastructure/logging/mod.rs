//! Logging bootstrap using tracing.
//!
//! Builds an `EnvFilter`-driven subscriber with a stdout layer in json or
//! pretty format and an optional rolling file layer. The returned guard
//! must be held for the lifetime of the process so buffered file output is
//! flushed.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Holds the non-blocking writer guard for file logging.
pub struct LogHandle {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber from logging configuration.
///
/// Returns an error if the level does not parse or a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> Result<LogHandle> {
    let default_level = parse_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let guard = if let Some(log_dir) = &config.log_dir {
        let file_appender = match config.rotation.as_str() {
            "hourly" => rolling::hourly(log_dir, "packmule.log"),
            "never" => rolling::never(log_dir, "packmule.log"),
            _ => rolling::daily(log_dir, "packmule.log"),
        };
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // File output stays structured regardless of the stdout format.
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        if config.format == "pretty" {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(stdout_layer)
                .try_init()
                .map_err(|init_error| anyhow!("failed to init logging: {init_error}"))?;
        } else {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(stdout_layer)
                .try_init()
                .map_err(|init_error| anyhow!("failed to init logging: {init_error}"))?;
        }
        Some(guard)
    } else {
        if config.format == "pretty" {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|init_error| anyhow!("failed to init logging: {init_error}"))?;
        } else {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|init_error| anyhow!("failed to init logging: {init_error}"))?;
        }
        None
    };

    Ok(LogHandle { _guard: guard })
}

fn parse_level(level: &str) -> Result<Level> {
    match level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("unknown log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert!(parse_level("loud").is_err());
    }
}
