// src/logging.rs

//! Logging setup for `taskdock` using `tracing` + `tracing-subscriber`.
//!
//! The level comes from the `--log-level` flag when given, then from the
//! `TASKDOCK_LOG` environment variable, and defaults to `info`. Log output
//! goes to stderr; stdout belongs to the task container.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise the global logging subscriber. Call once at startup; `init`
/// panics on a second call.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = cli_level
        .map(Level::from)
        .or_else(level_from_env)
        .unwrap_or(Level::INFO);

    fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// `tracing::Level` already knows how to parse "error" through "trace"
/// (case-insensitively), so the environment variable rides on that.
fn level_from_env() -> Option<Level> {
    std::env::var("TASKDOCK_LOG").ok()?.trim().parse().ok()
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
