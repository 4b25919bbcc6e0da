//! # Error Recovery
//!
//! Failure handling for the request orchestration core: a shared error
//! taxonomy, status/message classification, per-service retry policies and
//! circuit breakers, and the `ErrorRecoveryManager` that ties them together.
//!
//! ## Features
//!
//! - `ErrorKind` taxonomy and `classify_error` for HTTP status codes and messages
//! - Exponential, linear and immediate retry policies with bounded jitter
//! - Per-service circuit breakers with single-probe half-open recovery
//! - Per-request error contexts with attempt tracking
//! - Background sweep of expired open circuits
//! - Structured logging bootstrap shared by the workspace
//!

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod types;
pub mod classify;
pub mod context;
pub mod retry;
pub mod circuit_breaker;
pub mod recovery;
pub mod logging;

// Re-export commonly used types
pub use types::{Error, ErrorKind, RecoveryStrategy, Result};
pub use classify::{classify_error, classify_message, classify_status};
pub use context::ErrorContext;
pub use retry::{PolicyError, RetryPolicy, RetryStrategy};
pub use circuit_breaker::{CircuitBreaker, CircuitSettings, CircuitSnapshot, CircuitState, CircuitTransition};
pub use recovery::{ErrorRecoveryManager, MonitorHandle, RecoveryStats};
pub use logging::{init_logging, request_span, LoggingConfig, LoggingError};

/// Initializes logging with default settings
pub fn init() -> std::result::Result<(), LoggingError> {
    init_logging(None)
}

/// Initializes logging from the `logging` table of a loaded configuration
pub fn init_with_config(config: config::Config) -> std::result::Result<(), LoggingError> {
    let log_config = LoggingConfig::try_from(config)?;
    init_logging(Some(log_config))
}

// A panic while holding one of these locks leaves plain bookkeeping behind,
// never a half-applied invariant, so poisoned guards are recovered.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
