//! # Error Recovery Manager
//!
//! Owns every per-request `ErrorContext` and every per-service circuit, and
//! answers the three questions callers ask after a failure: what should I do,
//! may I retry, and how long should I wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use metrics::counter;
use serde::{Serialize, Deserialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitSettings, CircuitSnapshot, CircuitState, CircuitTransition};
use crate::context::ErrorContext;
use crate::retry::{PolicyError, RetryPolicy, RetryStrategy};
use crate::types::{Error, ErrorKind, RecoveryStrategy};
use crate::{lock, read, write};

/// Counters kept by the manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub errors_reported: u64,
    pub successes_reported: u64,
    pub errors_by_kind: HashMap<ErrorKind, u64>,
    pub abandoned_requests: u64,
}

/// Handle to the background task sweeping open circuits
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stops the monitor and waits for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Whether the task has already stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Failure classification, retry policy and circuit breaking in one place
#[derive(Debug)]
pub struct ErrorRecoveryManager {
    default_policy: RetryPolicy,
    policies: RwLock<HashMap<String, RetryPolicy>>,
    contexts: Mutex<HashMap<String, ErrorContext>>,
    circuits: CircuitBreaker,
    stats: Mutex<RecoveryStats>,
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ErrorRecoveryManager {
    /// Creates a manager; services without a registered policy use `default_policy`
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            default_policy,
            policies: RwLock::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            circuits: CircuitBreaker::new(),
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    /// Registers a callback fired on every circuit state change
    pub fn with_state_change_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.circuits.set_state_change_callback(callback);
        self
    }

    /// Registers the policy for a service at startup
    pub fn register_policy(&self, service: &str, policy: RetryPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        self.circuits.configure(service, CircuitSettings::from(&policy));
        write(&self.policies).insert(service.to_string(), policy);
        debug!(service = %service, "Retry policy registered");
        Ok(())
    }

    /// Administrative replacement of a service's policy
    pub fn update_policy(&self, service: &str, policy: RetryPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        let previous = write(&self.policies).insert(service.to_string(), policy.clone());
        self.circuits.configure(service, CircuitSettings::from(&policy));
        info!(
            service = %service,
            strategy = ?policy.strategy,
            max_retries = policy.max_retries,
            replaced = previous.is_some(),
            "Retry policy updated"
        );
        Ok(())
    }

    /// Policy in force for a service
    pub fn policy_for(&self, service: &str) -> RetryPolicy {
        read(&self.policies)
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Records a failure and decides how the caller should recover
    pub fn report_error(
        &self,
        kind: ErrorKind,
        message: &str,
        request_id: &str,
        service: &str,
        code: Option<u16>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> RecoveryStrategy {
        let policy = self.policy_for(service);

        let attempt_count = {
            let mut contexts = lock(&self.contexts);
            let ctx = contexts
                .entry(request_id.to_string())
                .and_modify(|ctx| ctx.record_failure(kind, message, code.unwrap_or(0)))
                .or_insert_with(|| {
                    ErrorContext::new(kind, message, request_id, service, code.unwrap_or(0))
                });
            if let Some(context) = context {
                ctx.merge_context(context);
            }
            ctx.attempt_count
        };

        if policy.enable_circuit_breaker {
            if kind.affects_circuit() {
                self.circuits.record_failure(service, CircuitSettings::from(&policy));
            } else {
                self.circuits.release_probe(service);
            }
        }

        {
            let mut stats = lock(&self.stats);
            stats.errors_reported += 1;
            *stats.errors_by_kind.entry(kind).or_insert(0) += 1;
        }

        let strategy = self.select_strategy(kind, attempt_count, &policy, service);

        warn!(
            request_id = %request_id,
            service = %service,
            error_kind = %kind.as_str(),
            code = ?code,
            attempt = attempt_count,
            strategy = %strategy,
            message = %message,
            "Failure reported"
        );
        counter!(
            "recovery_errors_reported_total",
            1,
            "service" => service.to_string(),
            "kind" => kind.as_str()
        );

        strategy
    }

    /// Reports a classified `Error`; request and service default to "unknown"
    pub fn report(&self, error: &Error) -> RecoveryStrategy {
        self.report_error(
            error.kind,
            &error.message,
            error.request_id.as_deref().unwrap_or("unknown"),
            error.service.as_deref().unwrap_or("unknown"),
            error.code,
            Some(error.context.clone()),
        )
    }

    fn select_strategy(
        &self,
        kind: ErrorKind,
        attempt_count: u32,
        policy: &RetryPolicy,
        service: &str,
    ) -> RecoveryStrategy {
        if !kind.is_retryable() {
            return match kind {
                ErrorKind::AuthenticationFailed => RecoveryStrategy::UserIntervention,
                _ => RecoveryStrategy::NoRetry,
            };
        }

        if policy.enable_circuit_breaker && self.circuits.state(service) == CircuitState::Open {
            return RecoveryStrategy::CircuitBreaker;
        }

        if kind == ErrorKind::ResourceExhausted {
            return RecoveryStrategy::GracefulDegradation;
        }

        if attempt_count >= policy.max_retries {
            return RecoveryStrategy::NoRetry;
        }

        match policy.strategy {
            RetryStrategy::Immediate => RecoveryStrategy::ImmediateRetry,
            RetryStrategy::Exponential => RecoveryStrategy::ExponentialBackoff,
            RetryStrategy::Linear => RecoveryStrategy::LinearBackoff,
            RetryStrategy::Never => RecoveryStrategy::NoRetry,
        }
    }

    /// Whether the request may be attempted again.
    ///
    /// In HalfOpen a `true` answer claims the circuit's single probe.
    pub fn should_retry(&self, request_id: &str, service: &str) -> bool {
        let policy = self.policy_for(service);
        if policy.strategy == RetryStrategy::Never {
            return false;
        }

        if let Some(ctx) = lock(&self.contexts).get(request_id) {
            if !ctx.kind.is_retryable() || ctx.attempt_count >= policy.max_retries {
                return false;
            }
        }

        if policy.enable_circuit_breaker {
            self.circuits.allow_request(service, CircuitSettings::from(&policy))
        } else {
            true
        }
    }

    /// Admission check before a first attempt
    pub fn allow_request(&self, service: &str) -> bool {
        let policy = self.policy_for(service);
        !policy.enable_circuit_breaker
            || self.circuits.allow_request(service, CircuitSettings::from(&policy))
    }

    /// Wait before the next attempt of `request_id`
    pub fn calculate_retry_delay(&self, request_id: &str, service: &str) -> Duration {
        let policy = self.policy_for(service);
        let (kind, attempt, retry_after) = lock(&self.contexts)
            .get(request_id)
            .map(|ctx| (ctx.kind, ctx.attempt_count, ctx.retry_after_ms().map(Duration::from_millis)))
            .unwrap_or((ErrorKind::Unknown, 1, None));

        let delay = policy.delay_for(kind, attempt, retry_after);
        debug!(
            request_id = %request_id,
            service = %service,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Retry delay calculated"
        );
        delay
    }

    /// Clears the request's context and credits the service's circuit
    pub fn report_success(&self, request_id: &str, service: &str) {
        let cleared = lock(&self.contexts).remove(request_id);
        let policy = self.policy_for(service);
        if policy.enable_circuit_breaker {
            self.circuits.record_success(service, CircuitSettings::from(&policy));
        }
        lock(&self.stats).successes_reported += 1;

        if let Some(ctx) = cleared {
            info!(
                request_id = %request_id,
                service = %service,
                attempts = ctx.attempt_count,
                "Request recovered"
            );
        }
    }

    /// Drops the context of a request that ended in failure or cancellation
    pub fn abandon(&self, request_id: &str) -> Option<ErrorContext> {
        let removed = lock(&self.contexts).remove(request_id);
        if removed.is_some() {
            lock(&self.stats).abandoned_requests += 1;
        }
        removed
    }

    /// Current context of a request, if it has failed at least once
    pub fn error_context(&self, request_id: &str) -> Option<ErrorContext> {
        lock(&self.contexts).get(request_id).cloned()
    }

    /// Number of requests with an active failure history
    pub fn active_contexts(&self) -> usize {
        lock(&self.contexts).len()
    }

    pub fn circuit_state(&self, service: &str) -> CircuitState {
        self.circuits.state(service)
    }

    pub fn circuit_snapshot(&self, service: &str) -> CircuitSnapshot {
        self.circuits.snapshot(service)
    }

    pub fn transitions(&self) -> Vec<CircuitTransition> {
        self.circuits.transitions()
    }

    /// Forces a service's circuit closed
    pub fn reset_circuit(&self, service: &str) {
        self.circuits.reset(service);
    }

    pub fn stats(&self) -> RecoveryStats {
        lock(&self.stats).clone()
    }

    /// Runs the open→half-open sweep every `interval` on a background task
    pub fn spawn_circuit_monitor(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let advanced = manager.circuits.advance_timeouts();
                        if !advanced.is_empty() {
                            debug!(services = ?advanced, "Circuit monitor advanced open circuits");
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Circuit monitor stopped");
        });

        MonitorHandle { shutdown, task }
    }
}
