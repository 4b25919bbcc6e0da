//! Error handling for the request orchestrator
//!
//! Transport failures are typed by `TransportError`; everything that can end a
//! request is an `OrchestratorError`. Both map onto the shared `ErrorKind`
//! taxonomy (see `mapping`) so the recovery manager can classify them.

use std::time::Duration;
use error_recovery_rs::ErrorKind;
use message_queue_rs::QueueError;
use thiserror::Error;

use crate::interpreter::ParseError;

pub mod mapping;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Outcome of a single failed HTTP exchange
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No complete response within the per-attempt timeout
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The host refused or could not be reached
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// A response arrived but could not be read
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request could not be built (bad URL, header, method)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other I/O failure
    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn connection_refused(message: impl Into<String>) -> Self {
        TransportError::ConnectionRefused(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        TransportError::MalformedResponse(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        TransportError::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        TransportError::Network(message.into())
    }

    /// Taxonomy kind of this failure
    pub fn kind(&self) -> ErrorKind {
        mapping::transport_error_kind(self)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Terminal failure of an orchestrated request
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered with a non-success status
    #[error("Backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to parse backend response: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The circuit for the backend is open and offline mode is off
    #[error("Service {0} is unavailable")]
    CircuitOpen(String),

    #[error("Request {0} was cancelled")]
    Cancelled(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        OrchestratorError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        OrchestratorError::Configuration(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        OrchestratorError::InvalidRequest(message.into())
    }

    /// Taxonomy kind of this failure
    pub fn kind(&self) -> ErrorKind {
        mapping::orchestrator_error_kind(self)
    }

    /// HTTP status carried by the failure, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OrchestratorError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Cancelled(_)
            | OrchestratorError::Configuration(_)
            | OrchestratorError::InvalidRequest(_) => false,
            _ => self.kind().is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
        assert!(err.is_retryable());

        let err = TransportError::invalid_request("relative URL");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_orchestrator_error_kinds() {
        let err = OrchestratorError::http(503, "maintenance");
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.status_code(), Some(503));
        assert!(err.is_retryable());

        let err = OrchestratorError::http(400, "missing request");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(!err.is_retryable());

        let err: OrchestratorError = TransportError::connection_refused("localhost:9").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        assert!(!OrchestratorError::Cancelled("r".into()).is_retryable());
    }
}
