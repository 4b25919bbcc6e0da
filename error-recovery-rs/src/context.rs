//! # Per-request Error Context
//!
//! Tracks the failure history of one in-flight request against one service:
//! the latest error, how many attempts have failed, and when.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::types::ErrorKind;

/// Failure history for a (request, service) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Kind of the most recent failure
    pub kind: ErrorKind,
    /// Message of the most recent failure
    pub message: String,
    /// Request the context belongs to
    pub request_id: String,
    /// Service the request was addressed to
    pub service: String,
    /// Numeric code of the most recent failure (HTTP status, 0 if none)
    pub code: u16,
    /// Number of failed attempts so far
    pub attempt_count: u32,
    /// When the first failure was reported
    pub first_attempt: DateTime<Utc>,
    /// When the most recent failure was reported
    pub last_attempt: DateTime<Utc>,
    /// Free-form context supplied by the reporter
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ErrorContext {
    /// Creates the context for a first failure
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        request_id: impl Into<String>,
        service: impl Into<String>,
        code: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind,
            message: message.into(),
            request_id: request_id.into(),
            service: service.into(),
            code,
            attempt_count: 1,
            first_attempt: now,
            last_attempt: now,
            context: serde_json::Map::new(),
        }
    }

    /// Records another failure for the same request
    pub fn record_failure(&mut self, kind: ErrorKind, message: impl Into<String>, code: u16) {
        self.kind = kind;
        self.message = message.into();
        self.code = code;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt = Utc::now();
    }

    /// Merges reporter-supplied context; later values overwrite earlier ones
    pub fn merge_context(&mut self, context: serde_json::Map<String, serde_json::Value>) {
        self.context.extend(context);
    }

    /// A server-suggested minimum wait, from `retry_after_ms` in the context
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.context.get("retry_after_ms").and_then(|value| value.as_u64())
    }

    /// Time between the first and the most recent failure
    pub fn failing_for(&self) -> chrono::Duration {
        self.last_attempt - self.first_attempt
    }
}
