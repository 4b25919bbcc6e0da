//! # Failure Types
//!
//! The error taxonomy shared by every component of the orchestration core,
//! the `Error` record reported to the recovery manager, and the recovery
//! strategies it hands back.

use std::fmt;
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes every failure the core can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The backend did not answer within the per-attempt timeout
    NetworkTimeout,
    /// The backend host refused or could not accept the connection
    ConnectionRefused,
    /// The backend answered 503 or is otherwise temporarily unavailable
    ServiceUnavailable,
    /// Credentials were rejected (401/403)
    AuthenticationFailed,
    /// The backend throttled the caller (429)
    RateLimitExceeded,
    /// The request itself was rejected (other 4xx)
    BadRequest,
    /// The backend failed while processing (5xx)
    ServerError,
    /// The exchange violated the expected wire protocol
    ProtocolError,
    /// A local or remote resource is exhausted
    ResourceExhausted,
    /// The response body could not be parsed (syntax or schema)
    ParseError,
    /// A single operation descriptor could not be translated
    TranslationError,
    /// A single translated operation failed to execute
    ExecutionError,
    /// Anything that could not be classified
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::NetworkTimeout,
        ErrorKind::ConnectionRefused,
        ErrorKind::ServiceUnavailable,
        ErrorKind::AuthenticationFailed,
        ErrorKind::RateLimitExceeded,
        ErrorKind::BadRequest,
        ErrorKind::ServerError,
        ErrorKind::ProtocolError,
        ErrorKind::ResourceExhausted,
        ErrorKind::ParseError,
        ErrorKind::TranslationError,
        ErrorKind::ExecutionError,
        ErrorKind::Unknown,
    ];

    /// Stable snake_case label used for metrics and structured logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::TranslationError => "translation_error",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether another attempt at the same request could plausibly succeed.
    ///
    /// Request-shaped failures (bad request, rejected credentials, protocol
    /// violations) and item-level pipeline failures never are.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::BadRequest
                | ErrorKind::AuthenticationFailed
                | ErrorKind::ProtocolError
                | ErrorKind::ParseError
                | ErrorKind::TranslationError
                | ErrorKind::ExecutionError
        )
    }

    /// Whether failures of this kind count against the service's circuit.
    ///
    /// Only failures that say something about the remote service's health do.
    pub fn affects_circuit(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTimeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::ServiceUnavailable
                | ErrorKind::ServerError
                | ErrorKind::RateLimitExceeded
                | ErrorKind::ResourceExhausted
                | ErrorKind::Unknown
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NetworkTimeout => write!(f, "Network timeout"),
            ErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            ErrorKind::ServiceUnavailable => write!(f, "Service unavailable"),
            ErrorKind::AuthenticationFailed => write!(f, "Authentication failed"),
            ErrorKind::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ErrorKind::BadRequest => write!(f, "Bad request"),
            ErrorKind::ServerError => write!(f, "Server error"),
            ErrorKind::ProtocolError => write!(f, "Protocol error"),
            ErrorKind::ResourceExhausted => write!(f, "Resource exhausted"),
            ErrorKind::ParseError => write!(f, "Parse error"),
            ErrorKind::TranslationError => write!(f, "Translation error"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::Unknown
    }
}

/// What the caller should do after a failure has been reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    /// Retry straight away
    ImmediateRetry,
    /// Retry after an exponentially growing delay
    ExponentialBackoff,
    /// Retry after a linearly growing delay
    LinearBackoff,
    /// The service's circuit is open; stop sending until it recovers
    CircuitBreaker,
    /// Fall back to a degraded mode (queue for later, cached answer, ...)
    GracefulDegradation,
    /// Only a human can fix this (credentials, quota)
    UserIntervention,
    /// Terminal; surface the failure
    NoRetry,
}

impl RecoveryStrategy {
    /// Whether the strategy asks for another attempt
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::ImmediateRetry
                | RecoveryStrategy::ExponentialBackoff
                | RecoveryStrategy::LinearBackoff
        )
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecoveryStrategy::ImmediateRetry => "immediate-retry",
            RecoveryStrategy::ExponentialBackoff => "exponential-backoff",
            RecoveryStrategy::LinearBackoff => "linear-backoff",
            RecoveryStrategy::CircuitBreaker => "circuit-breaker",
            RecoveryStrategy::GracefulDegradation => "graceful-degradation",
            RecoveryStrategy::UserIntervention => "user-intervention",
            RecoveryStrategy::NoRetry => "no-retry",
        };
        f.write_str(label)
    }
}

/// A classified failure, as exchanged between the transport, the queue and
/// the recovery manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// The service the failing call was addressed to
    pub service: Option<String>,
    /// Request the failure belongs to
    pub request_id: Option<String>,
    /// Numeric code, usually the HTTP status
    pub code: Option<u16>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            service: None,
            request_id: None,
            code: None,
            context: serde_json::Map::new(),
        }
    }

    /// Builds an error whose kind is derived from a status code and message
    pub fn classified<S: Into<String>>(code: Option<u16>, message: S) -> Self {
        let message = message.into();
        let kind = crate::classify::classify_error(code, &message);
        let mut error = Self::new(kind, message);
        error.code = code;
        error
    }

    /// Sets the service name
    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the request id
    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the numeric code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Adds a context value
    pub fn with_context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Whether the failure is worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!ErrorKind::BadRequest.is_retryable());
        assert!(!ErrorKind::AuthenticationFailed.is_retryable());
        assert!(!ErrorKind::ProtocolError.is_retryable());
        assert!(ErrorKind::NetworkTimeout.is_retryable());
        assert!(ErrorKind::ServiceUnavailable.is_retryable());
        assert!(ErrorKind::RateLimitExceeded.is_retryable());
    }

    #[test]
    fn test_error_builder() {
        let err = Error::new(ErrorKind::ServerError, "boom")
            .with_service("agent-backend")
            .with_request_id("req-1")
            .with_code(500)
            .with_context("attempt", 2);

        assert_eq!(err.service.as_deref(), Some("agent-backend"));
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert_eq!(err.code, Some(500));
        assert_eq!(err.context.get("attempt"), Some(&serde_json::json!(2)));
        assert_eq!(err.to_string(), "Server error: boom (code 500)");
    }

    #[test]
    fn test_classified_error() {
        let err = Error::classified(Some(429), "slow down");
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(err.code, Some(429));
    }

    #[test]
    fn test_strategy_is_retry() {
        assert!(RecoveryStrategy::ExponentialBackoff.is_retry());
        assert!(!RecoveryStrategy::CircuitBreaker.is_retry());
        assert!(!RecoveryStrategy::NoRetry.is_retry());
    }
}
