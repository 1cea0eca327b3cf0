//! Structured Logging
//!
//! JSON output for production, pretty-printed output for development.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Log level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed for development
    #[default]
    Pretty,
    /// JSON for production
    Json,
    /// Compact single-line
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include source file/line
    pub include_source: bool,
    pub include_thread_id: bool,
    /// Emit span open/close events
    pub include_span_events: bool,
    /// Filter directive (e.g. "coin_ledger=debug,coin_core=info"); overrides `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_source: true,
            include_thread_id: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Production configuration
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            include_source: false,
            include_thread_id: true,
            include_span_events: true,
            filter: None,
        }
    }

    /// Development configuration
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::default()
        }
    }

    /// Load from `COIN_LEDGER_LOG_LEVEL`, `COIN_LEDGER_LOG_FORMAT` and `COIN_LEDGER_LOG_FILTER`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env::var("COIN_LEDGER_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            config.level = level;
        }
        if let Some(format) = env::var("COIN_LEDGER_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
        {
            config.format = format;
        }
        config.filter = env::var("COIN_LEDGER_LOG_FILTER").ok();
        config
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Filter directive applied when none is configured explicitly
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(f) => f.clone(),
            None => ["coin_core", "coin_store", "coin_ledger"]
                .iter()
                .map(|target| format!("{}={}", target, self.level))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Formatting layer for the configured output style
fn fmt_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_thread_ids(config.include_thread_id)
        .with_file(config.include_source)
        .with_line_number(config.include_source);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Build a subscriber without installing it
pub fn build_subscriber(
    config: &LogConfig,
) -> Result<impl Subscriber + Send + Sync + 'static, Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(config.directive())?;
    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config)))
}

/// Initialize the global subscriber with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::subscriber::set_global_default(build_subscriber(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_presets() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Pretty);

        let production = LogConfig::production();
        assert_eq!(production.format, LogFormat::Json);
        assert!(production.include_thread_id);

        assert_eq!(LogConfig::development().level, LogLevel::Debug);
    }

    #[test]
    fn test_default_directive_covers_workspace_crates() {
        let directive = LogConfig::development().directive();
        assert_eq!(directive, "coin_core=debug,coin_store=debug,coin_ledger=debug");
        assert!(EnvFilter::try_new(&directive).is_ok());

        let custom = LogConfig::default().with_filter("coin_ledger=trace");
        assert_eq!(custom.directive(), "coin_ledger=trace");
    }

    #[test]
    fn test_parse_level_and_format() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }

    #[test]
    fn test_subscriber_builds_for_every_format() {
        for format in [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact] {
            let config = LogConfig {
                format,
                include_span_events: true,
                ..LogConfig::development()
            };
            let subscriber = build_subscriber(&config).unwrap();
            tracing::subscriber::with_default(subscriber, || {
                let span = tracing::info_span!("sweep", users = 3);
                let _guard = span.enter();
                tracing::debug!("Debit applied: user={}, amount={}", "u1", 15);
                assert!(tracing::enabled!(target: "coin_ledger", tracing::Level::DEBUG));
                assert!(!tracing::enabled!(target: "coin_ledger", tracing::Level::TRACE));
            });
        }
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig::default().with_filter("coin_ledger=loud");
        assert!(build_subscriber(&config).is_err());
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_log_config_serde() {
        let json = r#"{"level":"debug","format":"compact","include_source":false,
            "include_thread_id":false,"include_span_events":false,"filter":null}"#;
        let config: LogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Compact);
    }
}
