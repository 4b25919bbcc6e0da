//! # Structured Logging
//!
//! Subscriber bootstrap shared by every crate in the workspace, plus the
//! per-request span used to correlate log lines across retries.

use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, Registry};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::RollingFileAppender;

// Set once the global subscriber is installed
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Failures while installing the global subscriber
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to set global subscriber: {0}")]
    Subscriber(String),

    #[error("invalid logging configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Whether to also write daily-rotated files
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "request-orchestrator".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = LoggingError;

    /// Reads the `logging` table, falling back to defaults when absent
    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        match config.get::<LoggingConfig>("logging") {
            Ok(logging) => Ok(logging),
            Err(config::ConfigError::NotFound(_)) => Ok(LoggingConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Initializes the structured logging system.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is a no-op.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<(), LoggingError> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let subscriber = Registry::default().with(filter);

    // JSON and text layers have different concrete types, so each branch
    // finishes its own subscriber.
    let result = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true);
        tracing::subscriber::set_global_default(subscriber.with(json_layer).with(file_layer(&config)))
    } else {
        let text_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true);
        tracing::subscriber::set_global_default(subscriber.with(text_layer).with(file_layer(&config)))
    };
    result.map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

fn file_layer<S>(config: &LoggingConfig) -> Option<fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, NonBlocking>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if !config.file_output {
        return None;
    }
    let log_dir = config.log_dir.as_ref()?;

    let appender = RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        log_dir,
        format!("{}.log", config.service_name),
    );
    let (non_blocking, guard) = NonBlocking::new(appender);

    // The writer flushes on guard drop; logging lives as long as the process.
    Box::leak(Box::new(guard));

    Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
}

/// Span carrying the correlation id of one orchestrated request
pub fn request_span(request_id: &str, service: &str) -> Span {
    tracing::info_span!("request", request_id = %request_id, service = %service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_config_crate() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", true)
            .unwrap()
            .build()
            .unwrap();

        let logging = LoggingConfig::try_from(cfg).unwrap();
        assert_eq!(logging.level, "debug");
        assert!(logging.json_format);
        assert_eq!(logging.service_name, "request-orchestrator");
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let cfg = config::Config::builder().build().unwrap();
        assert_eq!(LoggingConfig::try_from(cfg).unwrap(), LoggingConfig::default());
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_logging(Some(LoggingConfig {
            level: "warn".into(),
            ..LoggingConfig::default()
        }))
        .is_ok());
        assert!(init_logging(None).is_ok());

        let span = request_span("req-1", "svc");
        let _entered = span.enter();
        tracing::warn!("inside request span");
    }
}
