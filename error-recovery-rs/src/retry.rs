//! # Retry Policies
//!
//! Per-service retry configuration and the delay calculation behind
//! `ErrorRecoveryManager::calculate_retry_delay`.
//!
//! Delay rules:
//! - exponential: `initial_delay * multiplier^(attempt - 1)`
//! - linear: `initial_delay * attempt`
//! - both capped at `max_delay`, then offset by a uniform jitter in
//!   `[-jitter, +jitter]`, then clamped into `[0, max_delay]`
//! - rate-limited requests wait at least `5s * attempt`, rejected
//!   credentials at least `10s`, and a server-supplied `retry_after_ms`
//!   is honoured up to `MAX_RETRY_AFTER_MS`

use std::time::Duration;
use rand::Rng;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::types::ErrorKind;

/// Minimum wait per attempt after a rate-limit response
pub const RATE_LIMIT_MIN_DELAY_MS: u64 = 5_000;

/// Minimum wait after an authentication failure
pub const AUTH_FAILURE_MIN_DELAY_MS: u64 = 10_000;

/// Longest server-suggested wait honoured for a single retry
pub const MAX_RETRY_AFTER_MS: u64 = 120_000;

/// Ways a retry policy can be invalid
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("max delay ({max:?}) must not be shorter than initial delay ({initial:?})")]
    InvalidDelays { initial: Duration, max: Duration },

    #[error("exponential backoff requires a multiplier greater than 1 (got {0})")]
    InvalidMultiplier(f64),

    #[error("circuit breaker failure threshold must be at least 1")]
    InvalidThreshold,
}

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Retry without waiting
    Immediate,
    /// Delay grows geometrically
    Exponential,
    /// Delay grows by `initial_delay` per attempt
    Linear,
    /// Do not retry at all
    #[serde(rename = "none")]
    Never,
}

/// Retry and circuit-breaker settings for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    /// Failed attempts after which the request is given up
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the random offset added to each delay
    #[serde(rename = "jitter_ms", with = "duration_ms")]
    pub jitter: Duration,
    pub enable_circuit_breaker: bool,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing
    #[serde(rename = "open_state_timeout_ms", with = "duration_ms")]
    pub open_state_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(100),
            enable_circuit_breaker: true,
            failure_threshold: 5,
            open_state_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries and keeps the circuit breaker on
    pub fn never() -> Self {
        Self {
            strategy: RetryStrategy::Never,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Retries up to `max_retries` times without waiting
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            strategy: RetryStrategy::Immediate,
            max_retries,
            initial_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Exponential backoff between the given bounds
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier: multiplier,
            ..Self::default()
        }
    }

    /// Linear backoff between the given bounds
    pub fn linear(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            max_retries,
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Sets the jitter bound
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enables the circuit breaker with the given threshold and open timeout
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, open_state_timeout: Duration) -> Self {
        self.enable_circuit_breaker = true;
        self.failure_threshold = failure_threshold;
        self.open_state_timeout = open_state_timeout;
        self
    }

    /// Disables the circuit breaker for the service
    pub fn without_circuit_breaker(mut self) -> Self {
        self.enable_circuit_breaker = false;
        self
    }

    /// Checks the policy's invariants
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_delay < self.initial_delay {
            return Err(PolicyError::InvalidDelays {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        if self.strategy == RetryStrategy::Exponential && !(self.backoff_multiplier > 1.0) {
            return Err(PolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        if self.enable_circuit_breaker && self.failure_threshold == 0 {
            return Err(PolicyError::InvalidThreshold);
        }
        Ok(())
    }

    /// Capped delay before jitter for the given (1-based) attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let raw_ms = match self.strategy {
            RetryStrategy::Immediate | RetryStrategy::Never => 0.0,
            RetryStrategy::Exponential => {
                initial_ms * self.backoff_multiplier.powf(f64::from(attempt - 1))
            }
            RetryStrategy::Linear => initial_ms * f64::from(attempt),
        };

        Duration::from_millis(raw_ms.min(max_ms).max(0.0) as u64)
    }

    /// Applies a random offset in `[-jitter, +jitter]`, clamped to `[0, max_delay]`
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter_ms = self.jitter.as_millis() as f64;
        if jitter_ms <= 0.0 || delay.is_zero() {
            return delay.min(self.max_delay);
        }

        let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
        let max_ms = self.max_delay.as_millis() as f64;
        let jittered = (delay.as_millis() as f64 + offset).max(0.0).min(max_ms);
        Duration::from_millis(jittered as u64)
    }

    /// The floor imposed by the failure kind itself
    pub fn minimum_delay(kind: ErrorKind, attempt: u32) -> Duration {
        match kind {
            ErrorKind::RateLimitExceeded => {
                Duration::from_millis(RATE_LIMIT_MIN_DELAY_MS.saturating_mul(u64::from(attempt.max(1))))
            }
            ErrorKind::AuthenticationFailed => Duration::from_millis(AUTH_FAILURE_MIN_DELAY_MS),
            _ => Duration::ZERO,
        }
    }

    /// Full delay for an attempt that failed with `kind`
    pub fn delay_for(&self, kind: ErrorKind, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.apply_jitter(self.base_delay(attempt));
        let hint = retry_after
            .unwrap_or(Duration::ZERO)
            .min(Duration::from_millis(MAX_RETRY_AFTER_MS));
        delay.max(Self::minimum_delay(kind, attempt)).max(hint)
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds
pub mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
