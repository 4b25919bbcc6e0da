//! Error classification
//!
//! Maps HTTP status codes, and failing that free-form messages, onto the
//! `ErrorKind` taxonomy.

use crate::types::ErrorKind;

/// Message fragments checked, in order, when no status code decides the kind
const MESSAGE_HEURISTICS: &[(&[&str], ErrorKind)] = &[
    (&["timed out", "timeout", "deadline exceeded"], ErrorKind::NetworkTimeout),
    (&["connection refused", "connection reset", "unreachable", "failed to connect"], ErrorKind::ConnectionRefused),
    (&["service unavailable", "temporarily unavailable", "unavailable"], ErrorKind::ServiceUnavailable),
    (&["unauthorized", "forbidden", "authentication", "invalid api key", "invalid token"], ErrorKind::AuthenticationFailed),
    (&["rate limit", "too many requests", "throttl"], ErrorKind::RateLimitExceeded),
    (&["protocol", "malformed", "unexpected eof"], ErrorKind::ProtocolError),
    (&["out of memory", "quota", "exhausted", "no space"], ErrorKind::ResourceExhausted),
    (&["parse", "json", "deserializ"], ErrorKind::ParseError),
    (&["bad request", "invalid request", "validation"], ErrorKind::BadRequest),
    (&["internal server error", "server error"], ErrorKind::ServerError),
];

/// Classifies a failure from an optional status code and its message
pub fn classify_error(code: Option<u16>, message: &str) -> ErrorKind {
    if let Some(kind) = code.and_then(classify_status) {
        return kind;
    }
    classify_message(message)
}

/// Maps an HTTP status code to an error kind, if the code is an error code
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        408 => Some(ErrorKind::NetworkTimeout),
        401 | 403 => Some(ErrorKind::AuthenticationFailed),
        429 => Some(ErrorKind::RateLimitExceeded),
        400..=499 => Some(ErrorKind::BadRequest),
        503 => Some(ErrorKind::ServiceUnavailable),
        500..=599 => Some(ErrorKind::ServerError),
        _ => None,
    }
}

/// Substring heuristics over a lower-cased message
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    MESSAGE_HEURISTICS
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| lowered.contains(needle)))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_error(Some(408), ""), ErrorKind::NetworkTimeout);
        assert_eq!(classify_error(Some(401), ""), ErrorKind::AuthenticationFailed);
        assert_eq!(classify_error(Some(403), ""), ErrorKind::AuthenticationFailed);
        assert_eq!(classify_error(Some(429), ""), ErrorKind::RateLimitExceeded);
        assert_eq!(classify_error(Some(404), ""), ErrorKind::BadRequest);
        assert_eq!(classify_error(Some(400), ""), ErrorKind::BadRequest);
        assert_eq!(classify_error(Some(503), ""), ErrorKind::ServiceUnavailable);
        assert_eq!(classify_error(Some(500), ""), ErrorKind::ServerError);
        assert_eq!(classify_error(Some(599), ""), ErrorKind::ServerError);
    }

    #[test]
    fn test_status_wins_over_message() {
        assert_eq!(
            classify_error(Some(500), "connection refused"),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(classify_error(None, "operation timed out"), ErrorKind::NetworkTimeout);
        assert_eq!(classify_error(Some(302), "Connection refused by peer"), ErrorKind::ConnectionRefused);
        assert_eq!(classify_error(None, "Too Many Requests"), ErrorKind::RateLimitExceeded);
        assert_eq!(classify_error(None, "invalid API key supplied"), ErrorKind::AuthenticationFailed);
        assert_eq!(classify_error(None, "failed to parse JSON"), ErrorKind::ParseError);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify_error(None, "something odd"), ErrorKind::Unknown);
        assert_eq!(classify_error(Some(200), ""), ErrorKind::Unknown);
    }
}
