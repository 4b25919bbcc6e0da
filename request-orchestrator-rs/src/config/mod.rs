//! Configuration for the request orchestrator
//!
//! Options can come from a map (`from_options`), a TOML/JSON file and
//! `ORCHESTRATOR_*` environment variables (`load_config`). Every key goes
//! through `apply_option`, which matches names case-insensitively and with or
//! without separators, so `MaxRetries`, `max_retries` and `MAX_RETRIES` are
//! the same option. Unknown keys and unparsable values are logged and
//! skipped; they never fail loading.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use config::Source;
use error_recovery_rs::{LoggingConfig, RetryPolicy};
use message_queue_rs::QueueConfig;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{OrchestratorError, Result};
use crate::util::parse_duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ORCHESTRATOR";

/// Everything the orchestrator reads at initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backend endpoint receiving `POST` requests
    pub backend_url: String,
    /// Name under which the backend's health is tracked
    pub service_name: String,
    pub max_retries: u32,
    /// Per-attempt transport timeout
    pub timeout_ms: u64,
    /// Capacity of the offline queue
    pub max_queue_size: usize,
    /// Queue requests instead of failing while the backend is down
    pub enable_offline_mode: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
    pub failure_threshold: u32,
    pub open_state_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000/api/agent".to_string(),
            service_name: "agent-backend".to_string(),
            max_retries: 3,
            timeout_ms: 30_000,
            max_queue_size: 1000,
            enable_offline_mode: false,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
            failure_threshold: 5,
            open_state_timeout_ms: 60_000,
            logging: LoggingConfig::default(),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | '.' | ' '))
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_millis(value: &str) -> Option<u64> {
    parse_duration(value).map(|d| d.as_millis() as u64)
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every entry of `options` on top of the defaults
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        config.apply_options(options);
        config
    }

    pub fn apply_options(&mut self, options: &HashMap<String, String>) {
        for (key, value) in options {
            self.apply_option(key, value);
        }
    }

    /// Applies one option; returns whether it was recognized and valid
    pub fn apply_option(&mut self, key: &str, value: &str) -> bool {
        let raw = value.trim();
        let applied = match normalize_key(key).as_str() {
            "backendurl" | "url" | "endpoint" => Url::parse(raw)
                .ok()
                .map(|_| self.backend_url = raw.to_string()),
            "servicename" | "service" => (!raw.is_empty()).then(|| self.service_name = raw.to_string()),
            "maxretries" => raw.parse().ok().map(|v| self.max_retries = v),
            "timeoutms" | "timeout" => parse_millis(raw)
                .filter(|ms| *ms > 0)
                .map(|v| self.timeout_ms = v),
            "maxqueuesize" => raw
                .parse()
                .ok()
                .filter(|size: &usize| *size > 0)
                .map(|v| self.max_queue_size = v),
            "enableofflinemode" | "offlinemode" => parse_bool(raw).map(|v| self.enable_offline_mode = v),
            "initialdelayms" => parse_millis(raw).map(|v| self.initial_delay_ms = v),
            "maxdelayms" => parse_millis(raw).map(|v| self.max_delay_ms = v),
            "backoffmultiplier" => raw
                .parse()
                .ok()
                .filter(|m: &f64| m.is_finite() && *m > 0.0)
                .map(|v| self.backoff_multiplier = v),
            "jitterms" => parse_millis(raw).map(|v| self.jitter_ms = v),
            "failurethreshold" => raw
                .parse()
                .ok()
                .filter(|t: &u32| *t > 0)
                .map(|v| self.failure_threshold = v),
            "openstatetimeoutms" => parse_millis(raw).map(|v| self.open_state_timeout_ms = v),
            "logginglevel" | "loglevel" => (!raw.is_empty()).then(|| self.logging.level = raw.to_lowercase()),
            "loggingjsonformat" | "logjson" => parse_bool(raw).map(|v| self.logging.json_format = v),
            "loggingfileoutput" | "logfile" => parse_bool(raw).map(|v| self.logging.file_output = v),
            "logginglogdir" | "logdir" => {
                self.logging.log_dir = Some(raw.to_string());
                Some(())
            }
            "loggingservicename" => (!raw.is_empty()).then(|| self.logging.service_name = raw.to_string()),
            _ => {
                warn!(option = %key, "Ignoring unknown configuration option");
                return false;
            }
        };

        match applied {
            Some(()) => {
                debug!(option = %key, "Configuration option applied");
                true
            }
            None => {
                warn!(option = %key, value = %value, "Ignoring invalid configuration value");
                false
            }
        }
    }

    /// Checks the combination of options
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.backend_url)
            .map_err(|e| OrchestratorError::configuration(format!("invalid backend URL: {}", e)))?;
        if self.timeout_ms == 0 {
            return Err(OrchestratorError::configuration("timeout_ms must be positive"));
        }
        if self.max_queue_size == 0 {
            return Err(OrchestratorError::configuration("max_queue_size must be positive"));
        }
        self.retry_policy()
            .validate()
            .map_err(|e| OrchestratorError::configuration(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Policy registered for `service_name` with the recovery manager
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter(Duration::from_millis(self.jitter_ms))
        .with_circuit_breaker(self.failure_threshold, Duration::from_millis(self.open_state_timeout_ms))
    }

    /// Limits for the offline queue
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default().with_max_queue_size(self.max_queue_size)
    }
}

/// Loads defaults, then `path` (TOML or JSON, by extension), then
/// `ORCHESTRATOR_*` variables. Nested keys use `__` in variable names
/// (`ORCHESTRATOR_LOGGING__LEVEL`).
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder
        .build()
        .map_err(|e| OrchestratorError::configuration(e.to_string()))?;
    let table = settings
        .collect()
        .map_err(|e| OrchestratorError::configuration(e.to_string()))?;

    let mut options = HashMap::new();
    flatten_into(&mut options, "", table);

    let config = OrchestratorConfig::from_options(&options);
    config.validate()?;
    Ok(config)
}

fn flatten_into(options: &mut HashMap<String, String>, prefix: &str, table: config::Map<String, config::Value>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value.clone().into_table() {
            Ok(nested) => flatten_into(options, &key, nested),
            Err(_) => match value.into_string() {
                Ok(text) => {
                    options.insert(key, text);
                }
                Err(e) => warn!(option = %key, error = %e, "Ignoring non-scalar configuration value"),
            },
        }
    }
}
