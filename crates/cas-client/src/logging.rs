//! Tracing subscriber setup for applications embedding the client
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want them printed call [`setup_logging`] once.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{CasError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// JSON lines instead of human-readable output
    pub json: bool,
    /// Include file name and line number
    pub file_info: bool,
    /// Log span enter and exit events
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Human-readable output at `level`
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span events
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// `RUST_LOG` directives on top of the configured level
    fn filter(&self) -> EnvFilter {
        EnvFilter::from_default_env().add_directive(self.level.into())
    }
}

/// Installs a global subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter())
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CasError::ConfigError(format!("Cannot install log subscriber: {}", e)))
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| CasError::ConfigError(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("chatty"), Err(CasError::ConfigError(_))));
    }

    #[test]
    fn test_config_builders() {
        let config = LoggingConfig::new(Level::DEBUG).with_json().with_file_info().with_spans();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.json && config.file_info && config.log_spans);
        assert!(!LoggingConfig::default().json);
    }

    #[test]
    fn test_second_install_fails() {
        let _ = setup_logging(LoggingConfig::default());
        assert!(setup_logging(LoggingConfig::default()).is_err());
    }
}
