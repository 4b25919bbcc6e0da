//! Error mapping onto the shared taxonomy
//!
//! Converts transport failures, HTTP error responses and orchestrator errors
//! into `ErrorKind`s and `error_recovery_rs::Error` records.

use std::collections::HashMap;
use error_recovery_rs::{classify_error, classify_message, Error, ErrorKind};
use serde_json::Value;

use super::{OrchestratorError, TransportError};

/// Map a transport failure to an error kind
pub fn transport_error_kind(error: &TransportError) -> ErrorKind {
    match error {
        TransportError::Timeout(_) => ErrorKind::NetworkTimeout,
        TransportError::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
        TransportError::MalformedResponse(_) => ErrorKind::ProtocolError,
        TransportError::InvalidRequest(_) => ErrorKind::BadRequest,
        TransportError::Network(message) => match classify_message(message) {
            ErrorKind::Unknown => ErrorKind::ConnectionRefused,
            kind => kind,
        },
    }
}

/// Map any orchestrator failure to an error kind
pub fn orchestrator_error_kind(error: &OrchestratorError) -> ErrorKind {
    match error {
        OrchestratorError::Transport(e) => transport_error_kind(e),
        OrchestratorError::Http { status, message } => classify_error(Some(*status), message),
        OrchestratorError::Parse(_) => ErrorKind::ParseError,
        OrchestratorError::Configuration(_) | OrchestratorError::InvalidRequest(_) => ErrorKind::BadRequest,
        OrchestratorError::CircuitOpen(_) => ErrorKind::ServiceUnavailable,
        OrchestratorError::Queue(_) => ErrorKind::ResourceExhausted,
        OrchestratorError::Cancelled(_) => ErrorKind::Unknown,
    }
}

/// Extract a readable message from an error response body.
///
/// JSON bodies are searched for `message`, `error` (string or `{message}`)
/// and `detail`; anything else is returned trimmed.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            })
            .or_else(|| json.get("detail").and_then(Value::as_str));

        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        crate::util::truncate_string(trimmed, 200)
    }
}

/// Server-suggested wait from a `Retry-After` header given in seconds.
///
/// Values too large to express in milliseconds saturate; the recovery
/// manager bounds the wait it actually honours.
pub fn retry_after_ms(headers: &HashMap<String, String>) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

/// Record of `error` suitable for the recovery manager
pub fn to_recovery_error(error: &OrchestratorError, request_id: &str, service: &str) -> Error {
    let mut record = Error::new(error.kind(), error.to_string())
        .with_request_id(request_id)
        .with_service(service);
    if let Some(status) = error.status_code() {
        record = record.with_code(status);
    }
    record
}
