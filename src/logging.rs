// src/logging.rs

//! Log subscriber setup.
//!
//! `--log-level` sets the level for everything. Without it, `FRAMEWRIGHT_LOG`
//! is read as an `EnvFilter` directive list, so per-module levels work:
//!
//! ```text
//! FRAMEWRIGHT_LOG=info,framewright::exec=debug framewright render scene.py
//! ```
//!
//! Output goes to stderr; stdout only carries the artifact path.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FRAMEWRIGHT_LOG";

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level.as_directive()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} value '{directives}'")),
        None => Ok(EnvFilter::new("info")),
    }
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_overrides_env() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn env_accepts_module_directives() {
        let filter = build_filter(None, Some("warn,framewright::exec=trace")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("framewright::exec=trace"));
    }

    #[test]
    fn defaults_to_info_and_rejects_garbage() {
        assert_eq!(build_filter(None, None).unwrap().to_string(), "info");
        assert_eq!(build_filter(None, Some("  ")).unwrap().to_string(), "info");
        assert!(build_filter(None, Some("framewright=loud")).is_err());
    }
}
