//! # Per-service Circuit Breaker
//!
//! One state machine per service name, created lazily on first use:
//!
//! - Closed → Open once consecutive failures reach the failure threshold
//! - Open → HalfOpen once the open-state timeout has elapsed, either when a
//!   caller asks for admission or when the background monitor sweeps
//! - HalfOpen admits a single probe at a time; three consecutive successful
//!   probes close the circuit, any failure reopens it
//!
//! Every transition resets the counters and stamps `last_state_change`.
//! Transitions for one service are totally ordered by the table lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};
use crate::lock;
use crate::retry::RetryPolicy;

/// Consecutive half-open successes needed to close a circuit
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Probing recovery, one request at a time
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Thresholds governing one circuit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub open_state_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for CircuitSettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            failure_threshold: policy.failure_threshold.max(1),
            open_state_timeout: policy.open_state_timeout,
            success_threshold: HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTransition {
    pub service: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time since the last transition
    pub time_in_state: Duration,
    /// Time since the most recent failure
    pub since_last_failure: Option<Duration>,
    /// Remaining open time before a probe is admitted
    pub time_until_probe: Option<Duration>,
}

#[derive(Debug)]
struct CircuitStats {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
    /// Set while a half-open probe is outstanding
    probe_started: Option<Instant>,
    settings: CircuitSettings,
}

impl CircuitStats {
    fn new(settings: CircuitSettings) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_state_change: Instant::now(),
            probe_started: None,
            settings,
        }
    }

    fn open_timeout_elapsed(&self) -> bool {
        self.last_state_change.elapsed() >= self.settings.open_state_timeout
    }

    fn probe_outstanding(&self) -> bool {
        // A probe whose owner never reported back is abandoned after one timeout
        self.probe_started
            .map(|started| started.elapsed() < self.settings.open_state_timeout)
            .unwrap_or(false)
    }
}

type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Table of circuits keyed by service name
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, CircuitStats>>,
    transitions: Mutex<Vec<CircuitTransition>>,
    state_change_callback: Option<StateChangeCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("circuits", &lock(&self.circuits).len())
            .field("has_callback", &self.state_change_callback.is_some())
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Creates an empty table
    pub fn new() -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            transitions: Mutex::new(Vec::new()),
            state_change_callback: None,
        }
    }

    /// Sets a callback invoked after every state change
    pub fn set_state_change_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.state_change_callback = Some(Arc::new(callback));
    }

    /// Updates the thresholds of a circuit, creating it if needed
    pub fn configure(&self, service: &str, settings: CircuitSettings) {
        let mut circuits = lock(&self.circuits);
        circuits
            .entry(service.to_string())
            .and_modify(|stats| stats.settings = settings)
            .or_insert_with(|| CircuitStats::new(settings));
    }

    /// Asks whether a call to `service` may proceed.
    ///
    /// In HalfOpen a `true` answer hands out the single probe slot; the
    /// caller must report the outcome through `record_success` or
    /// `record_failure`.
    pub fn allow_request(&self, service: &str, settings: CircuitSettings) -> bool {
        let (allowed, transition) = {
            let mut circuits = lock(&self.circuits);
            let stats = circuits
                .entry(service.to_string())
                .or_insert_with(|| CircuitStats::new(settings));

            match stats.state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => {
                    if stats.open_timeout_elapsed() {
                        let transition = Self::set_state(service, stats, CircuitState::HalfOpen);
                        stats.probe_started = Some(Instant::now());
                        (true, Some(transition))
                    } else {
                        debug!(
                            circuit = %service,
                            remaining_ms = %stats
                                .settings
                                .open_state_timeout
                                .saturating_sub(stats.last_state_change.elapsed())
                                .as_millis(),
                            "Circuit open, request rejected"
                        );
                        (false, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if stats.probe_outstanding() {
                        (false, None)
                    } else {
                        stats.probe_started = Some(Instant::now());
                        (true, None)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.publish(transition);
        }
        allowed
    }

    /// Records a successful call
    pub fn record_success(&self, service: &str, settings: CircuitSettings) {
        let transition = {
            let mut circuits = lock(&self.circuits);
            let stats = circuits
                .entry(service.to_string())
                .or_insert_with(|| CircuitStats::new(settings));

            match stats.state {
                CircuitState::Closed => {
                    stats.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    stats.probe_started = None;
                    stats.success_count += 1;
                    if stats.success_count >= stats.settings.success_threshold {
                        Some(Self::set_state(service, stats, CircuitState::Closed))
                    } else {
                        debug!(
                            circuit = %service,
                            successes = stats.success_count,
                            needed = stats.settings.success_threshold,
                            "Half-open probe succeeded"
                        );
                        None
                    }
                }
                // A straggler finishing after the circuit opened says nothing new
                CircuitState::Open => None,
            }
        };

        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    /// Records a failed call
    pub fn record_failure(&self, service: &str, settings: CircuitSettings) {
        let transition = {
            let mut circuits = lock(&self.circuits);
            let stats = circuits
                .entry(service.to_string())
                .or_insert_with(|| CircuitStats::new(settings));

            stats.last_failure = Some(Instant::now());

            match stats.state {
                CircuitState::Closed => {
                    stats.failure_count += 1;
                    if stats.failure_count >= stats.settings.failure_threshold {
                        Some(Self::set_state(service, stats, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => Some(Self::set_state(service, stats, CircuitState::Open)),
                CircuitState::Open => {
                    stats.failure_count += 1;
                    None
                }
            }
        };

        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    /// Frees an outstanding half-open probe without counting an outcome.
    ///
    /// Used when the probe ended with a failure that says nothing about the
    /// service's health, so the next caller may probe instead.
    pub fn release_probe(&self, service: &str) {
        let mut circuits = lock(&self.circuits);
        if let Some(stats) = circuits.get_mut(service) {
            if stats.state == CircuitState::HalfOpen && stats.probe_started.take().is_some() {
                debug!(circuit = %service, "Half-open probe released");
            }
        }
    }

    /// Moves every open circuit whose timeout has elapsed to HalfOpen.
    ///
    /// Returns the services that changed state.
    pub fn advance_timeouts(&self) -> Vec<String> {
        let transitions: Vec<CircuitTransition> = {
            let mut circuits = lock(&self.circuits);
            circuits
                .iter_mut()
                .filter(|(_, stats)| stats.state == CircuitState::Open && stats.open_timeout_elapsed())
                .map(|(service, stats)| Self::set_state(service, stats, CircuitState::HalfOpen))
                .collect()
        };

        let services = transitions.iter().map(|t| t.service.clone()).collect();
        for transition in transitions {
            self.publish(transition);
        }
        services
    }

    /// Current state without side effects
    pub fn state(&self, service: &str) -> CircuitState {
        lock(&self.circuits)
            .get(service)
            .map(|stats| stats.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Detailed view of a circuit
    pub fn snapshot(&self, service: &str) -> CircuitSnapshot {
        let circuits = lock(&self.circuits);
        match circuits.get(service) {
            Some(stats) => CircuitSnapshot {
                state: stats.state,
                failure_count: stats.failure_count,
                success_count: stats.success_count,
                time_in_state: stats.last_state_change.elapsed(),
                since_last_failure: stats.last_failure.map(|at| at.elapsed()),
                time_until_probe: (stats.state == CircuitState::Open).then(|| {
                    stats
                        .settings
                        .open_state_timeout
                        .saturating_sub(stats.last_state_change.elapsed())
                }),
            },
            None => CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                time_in_state: Duration::ZERO,
                since_last_failure: None,
                time_until_probe: None,
            },
        }
    }

    /// Services with a circuit, in no particular order
    pub fn services(&self) -> Vec<String> {
        lock(&self.circuits).keys().cloned().collect()
    }

    /// History of all transitions, oldest first
    pub fn transitions(&self) -> Vec<CircuitTransition> {
        lock(&self.transitions).clone()
    }

    /// Forces a circuit back to Closed
    pub fn reset(&self, service: &str) {
        let transition = {
            let mut circuits = lock(&self.circuits);
            match circuits.get_mut(service) {
                Some(stats) if stats.state != CircuitState::Closed => {
                    Some(Self::set_state(service, stats, CircuitState::Closed))
                }
                Some(stats) => {
                    stats.failure_count = 0;
                    None
                }
                None => None,
            }
        };

        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    fn set_state(service: &str, stats: &mut CircuitStats, to: CircuitState) -> CircuitTransition {
        let from = stats.state;
        stats.state = to;
        stats.failure_count = 0;
        stats.success_count = 0;
        stats.probe_started = None;
        stats.last_state_change = Instant::now();

        CircuitTransition {
            service: service.to_string(),
            from,
            to,
            at: Utc::now(),
        }
    }

    fn publish(&self, transition: CircuitTransition) {
        match transition.to {
            CircuitState::Open => warn!(
                circuit = %transition.service,
                from = %transition.from,
                "Circuit OPEN: service failing, requests blocked"
            ),
            CircuitState::HalfOpen => info!(
                circuit = %transition.service,
                "Circuit HALF-OPEN: probing service recovery"
            ),
            CircuitState::Closed => info!(
                circuit = %transition.service,
                from = %transition.from,
                "Circuit CLOSED: service recovered"
            ),
        }

        gauge!(
            "circuit_breaker_state",
            transition.to.gauge_value(),
            "service" => transition.service.clone()
        );
        counter!(
            "circuit_breaker_transitions_total",
            1,
            "service" => transition.service.clone(),
            "to" => transition.to.to_string()
        );

        if let Some(callback) = &self.state_change_callback {
            callback(&transition.service, transition.from, transition.to);
        }

        lock(&self.transitions).push(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn settings(threshold: u32, timeout_ms: u64) -> CircuitSettings {
        CircuitSettings {
            failure_threshold: threshold,
            open_state_timeout: Duration::from_millis(timeout_ms),
            success_threshold: HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = CircuitBreaker::new();
        let s = settings(3, 10_000);

        cb.record_failure("svc", s);
        cb.record_failure("svc", s);
        assert_eq!(cb.state("svc"), CircuitState::Closed);

        cb.record_failure("svc", s);
        assert_eq!(cb.state("svc"), CircuitState::Open);
        assert!(!cb.allow_request("svc", s));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new();
        let s = settings(3, 10_000);

        cb.record_failure("svc", s);
        cb.record_failure("svc", s);
        cb.record_success("svc", s);
        cb.record_failure("svc", s);
        cb.record_failure("svc", s);

        assert_eq!(cb.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_single_probe_then_close() {
        let cb = CircuitBreaker::new();
        let s = settings(1, 50);

        cb.record_failure("svc", s);
        assert_eq!(cb.state("svc"), CircuitState::Open);

        sleep(Duration::from_millis(80)).await;

        // First caller gets the probe, the second is turned away
        assert!(cb.allow_request("svc", s));
        assert_eq!(cb.state("svc"), CircuitState::HalfOpen);
        assert!(!cb.allow_request("svc", s));

        for _ in 0..HALF_OPEN_SUCCESS_THRESHOLD - 1 {
            cb.record_success("svc", s);
            assert_eq!(cb.state("svc"), CircuitState::HalfOpen);
            assert!(cb.allow_request("svc", s));
        }
        cb.record_success("svc", s);

        assert_eq!(cb.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new();
        let s = settings(1, 30);

        cb.record_failure("svc", s);
        sleep(Duration::from_millis(50)).await;
        assert!(cb.allow_request("svc", s));

        cb.record_failure("svc", s);
        assert_eq!(cb.state("svc"), CircuitState::Open);
        assert!(!cb.allow_request("svc", s));

        let states: Vec<_> = cb.transitions().iter().map(|t| t.to).collect();
        assert_eq!(states, vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Open]);
    }

    #[tokio::test]
    async fn test_released_probe_admits_next_caller() {
        let cb = CircuitBreaker::new();
        let s = settings(1, 50);

        cb.record_failure("svc", s);
        sleep(Duration::from_millis(70)).await;
        assert!(cb.allow_request("svc", s));
        assert!(!cb.allow_request("svc", s));

        cb.release_probe("svc");
        assert_eq!(cb.state("svc"), CircuitState::HalfOpen);
        assert!(cb.allow_request("svc", s));

        // Nothing to release outside HalfOpen
        cb.release_probe("unknown");
        assert_eq!(cb.state("unknown"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_advance_timeouts() {
        let cb = CircuitBreaker::new();
        let s = settings(1, 20);

        cb.record_failure("a", s);
        cb.record_failure("b", settings(1, 60_000));
        sleep(Duration::from_millis(40)).await;

        let advanced = cb.advance_timeouts();
        assert_eq!(advanced, vec!["a".to_string()]);
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
        assert_eq!(cb.state("b"), CircuitState::Open);
    }

    #[test]
    fn test_callback_and_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut cb = CircuitBreaker::new();
        cb.set_state_change_callback(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let s = settings(2, 10_000);
        cb.record_failure("svc", s);
        let snapshot = cb.snapshot("svc");
        assert_eq!(snapshot.failure_count, 1);
        assert!(snapshot.time_until_probe.is_none());

        cb.record_failure("svc", s);
        let snapshot = cb.snapshot("svc");
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.time_until_probe.is_some());

        cb.reset("svc");
        assert_eq!(cb.state("svc"), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
