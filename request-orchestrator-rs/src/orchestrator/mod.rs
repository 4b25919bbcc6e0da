//! # Request Orchestrator
//!
//! Drives one request end to end: sends it through the transport under the
//! recovery manager's retry and circuit-breaker rules, then interprets the
//! response, translates its operations and executes them against the
//! document. Every request ends in exactly one terminal state and every
//! registered listener hears about it once.
//!
//! Retry waits are cancellable: `cancel` flips the request's watch channel,
//! which wakes a pending backoff sleep. A transport call already in flight
//! runs to completion, but its result is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use error_recovery_rs::{request_span, ErrorRecoveryManager, RecoveryStrategy};
use message_queue_rs::{MessagePriority, MessageQueue, ProcessorHandle, QueueProcessor, QueuedMessage};
use metrics::counter;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::config::OrchestratorConfig;
use crate::error::mapping::{extract_error_message, retry_after_ms};
use crate::error::OrchestratorError;
use crate::executor::OperationExecutor;
use crate::interpreter::{self, ResponseErrorKind};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::translator::OperationTranslator;

pub mod builder;
pub mod request;
mod sink;

pub use builder::OrchestratorBuilder;
pub use request::{OrchestrationOutcome, Request, RequestState};

/// Receives the display text of every finished request
pub trait ResponseListener: Send + Sync {
    fn on_response_ready(&self, display_text: &str);
}

/// Adapts a closure into a `ResponseListener`
pub struct FnListener<F>(pub F);

impl<F> ResponseListener for FnListener<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_response_ready(&self, display_text: &str) {
        (self.0)(display_text)
    }
}

/// Request counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub queued: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    queued: AtomicU64,
}

impl StatsCounters {
    fn record_terminal(&self, state: RequestState) {
        let counter = match state {
            RequestState::Success => &self.succeeded,
            RequestState::Failed => &self.failed,
            RequestState::Cancelled => &self.cancelled,
            RequestState::Queued => &self.queued,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            requests: self.requests.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}

struct ActiveRequest {
    cancel: watch::Sender<bool>,
    state: RequestState,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What one transport attempt produced
enum Attempt {
    Response(TransportResponse),
    Failed {
        error: OrchestratorError,
        retry_after_ms: Option<u64>,
    },
}

pub struct RequestOrchestrator {
    config: OrchestratorConfig,
    transport: Arc<dyn Transport>,
    recovery: Arc<ErrorRecoveryManager>,
    translator: OperationTranslator,
    executor: OperationExecutor,
    listeners: Vec<Arc<dyn ResponseListener>>,
    queue: Arc<MessageQueue>,
    active: Mutex<HashMap<String, ActiveRequest>>,
    stats: StatsCounters,
}

impl RequestOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    /// The offline queue
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Convenience wrapper around `process`
    pub async fn process_text(&self, text: &str, context: Option<Value>) -> OrchestrationOutcome {
        let mut request = Request::new(text);
        if let Some(context) = context {
            request = request.with_context(context);
        }
        self.process(request).await
    }

    /// Runs a request to its terminal state and notifies the listeners
    pub async fn process(&self, request: Request) -> OrchestrationOutcome {
        let span = request_span(&request.id, &self.config.service_name);
        self.run(request).instrument(span).await
    }

    async fn run(&self, mut request: Request) -> OrchestrationOutcome {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let outcome = if request.text.trim().is_empty() {
            OrchestrationOutcome::failed(&request.id, OrchestratorError::invalid_request("request text is empty"), 0)
        } else {
            match self.register(&request.id) {
                Some(mut cancelled) => {
                    let outcome = self.drive(&mut request, &mut cancelled).await;
                    lock(&self.active).remove(&request.id);
                    outcome
                }
                None => OrchestrationOutcome::failed(
                    &request.id,
                    OrchestratorError::invalid_request(format!("request {} is already in progress", request.id)),
                    0,
                ),
            }
        };

        self.finish(&outcome);
        outcome
    }

    /// Tracks the request; `None` if the id is already active
    fn register(&self, request_id: &str) -> Option<watch::Receiver<bool>> {
        let mut active = lock(&self.active);
        if active.contains_key(request_id) {
            return None;
        }
        let (cancel, cancelled) = watch::channel(false);
        active.insert(
            request_id.to_string(),
            ActiveRequest {
                cancel,
                state: RequestState::Created,
            },
        );
        Some(cancelled)
    }

    fn set_state(&self, request_id: &str, state: RequestState) {
        if let Some(entry) = lock(&self.active).get_mut(request_id) {
            debug!(from = %entry.state, to = %state, "Request state changed");
            entry.state = state;
        }
    }

    async fn drive(&self, request: &mut Request, cancelled: &mut watch::Receiver<bool>) -> OrchestrationOutcome {
        let service = self.config.service_name.clone();
        let mut attempts = 0;

        if !self.recovery.allow_request(&service) {
            info!(service = %service, "Circuit open, request not sent");
            return self.degrade(request, OrchestratorError::CircuitOpen(service.clone()), attempts).await;
        }

        loop {
            if *cancelled.borrow() {
                self.recovery.abandon(&request.id);
                return OrchestrationOutcome::cancelled(&request.id, attempts);
            }

            self.set_state(&request.id, RequestState::Sent);
            attempts += 1;
            let attempt = self.attempt(request).await;

            // A result arriving after cancellation is discarded
            if *cancelled.borrow() {
                debug!(attempt = attempts, "Discarding result of cancelled request");
                self.recovery.abandon(&request.id);
                return OrchestrationOutcome::cancelled(&request.id, attempts);
            }

            let (error, retry_after) = match attempt {
                Attempt::Response(response) => {
                    self.recovery.report_success(&request.id, &service);
                    return self.complete(&request.id, &response.body, attempts).await;
                }
                Attempt::Failed { error, retry_after_ms } => (error, retry_after_ms),
            };

            let mut context = serde_json::Map::new();
            if let Some(ms) = retry_after {
                context.insert("retry_after_ms".to_string(), Value::from(ms));
            }
            let strategy = self.recovery.report_error(
                error.kind(),
                &error.to_string(),
                &request.id,
                &service,
                error.status_code(),
                Some(context),
            );

            if matches!(strategy, RecoveryStrategy::CircuitBreaker | RecoveryStrategy::GracefulDegradation) {
                self.recovery.abandon(&request.id);
                return self.degrade(request, error, attempts).await;
            }

            if !error.is_retryable() || !strategy.is_retry() || !self.recovery.should_retry(&request.id, &service) {
                self.recovery.abandon(&request.id);
                warn!(attempts = attempts, strategy = %strategy, error = %error, "Request failed");
                return OrchestrationOutcome::failed(&request.id, error, attempts);
            }

            let delay = self.recovery.calculate_retry_delay(&request.id, &service);
            request.retry_count += 1;
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            self.set_state(&request.id, RequestState::Retrying);
            info!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                strategy = %strategy,
                error = %error,
                "Retrying request"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancelled.changed() => {
                    // A dropped sender means the entry is gone; treat like cancellation
                    if changed.is_err() || *cancelled.borrow() {
                        self.recovery.abandon(&request.id);
                        return OrchestrationOutcome::cancelled(&request.id, attempts);
                    }
                }
            }
        }
    }

    async fn attempt(&self, request: &Request) -> Attempt {
        let outbound = TransportRequest::post_json(&self.config.backend_url, &request.body())
            .with_header("X-Request-ID", request.id.clone())
            .with_header("Accept", "application/json")
            .with_timeout(self.config.timeout());

        match self.transport.execute(outbound).await {
            Ok(response) if response.is_success() => Attempt::Response(response),
            Ok(response) => Attempt::Failed {
                error: OrchestratorError::http(response.status, extract_error_message(&response.body)),
                retry_after_ms: retry_after_ms(&response.headers),
            },
            Err(error) => Attempt::Failed {
                error: error.into(),
                retry_after_ms: None,
            },
        }
    }

    /// Interprets, translates and executes a successful response
    pub(crate) async fn complete(&self, request_id: &str, body: &str, attempts: u32) -> OrchestrationOutcome {
        let parsed = interpreter::parse(body);

        if !parsed.success {
            let error = parsed.error.clone().unwrap_or_else(|| "unknown error".to_string());
            let mut outcome = match parsed.error_kind {
                Some(ResponseErrorKind::Backend) => OrchestrationOutcome::failed(request_id, &error, attempts),
                _ => OrchestrationOutcome::failed(
                    request_id,
                    format!("Failed to parse backend response: {}", error),
                    attempts,
                ),
            };
            outcome.parsed = Some(parsed);
            return outcome;
        }

        let translated = self.translator.translate_all(&parsed.operations);
        let execution = if translated.is_empty() {
            None
        } else {
            Some(self.executor.execute(&translated).await)
        };

        let mut display_text = parsed.response_text.trim().to_string();
        if let Some(report) = &execution {
            if !display_text.is_empty() {
                display_text.push_str("\n\n");
            }
            display_text.push_str(&report.summary.describe());
            for failure in report.failures() {
                display_text.push_str("\n- ");
                display_text.push_str(&failure);
            }
        }
        if display_text.is_empty() {
            display_text = "Request completed".to_string();
        }

        let mut outcome = OrchestrationOutcome::new(request_id, RequestState::Success, display_text, attempts);
        outcome.parsed = Some(parsed);
        outcome.execution = execution;
        outcome
    }

    /// Hands the request to the offline queue, or fails it when offline mode is off
    async fn degrade(&self, request: &Request, error: OrchestratorError, attempts: u32) -> OrchestrationOutcome {
        if !self.config.enable_offline_mode {
            return OrchestrationOutcome::failed(&request.id, error, attempts);
        }

        match self.enqueue(request).await {
            Ok(message_id) => {
                info!(message_id = %message_id, cause = %error, "Request queued for later delivery");
                let mut outcome = OrchestrationOutcome::new(
                    &request.id,
                    RequestState::Queued,
                    "The assistant is unavailable; your request was queued and will be sent when it recovers",
                    attempts,
                );
                outcome.error = Some(error.to_string());
                outcome.queued_message_id = Some(message_id);
                outcome
            }
            Err(queue_error) => {
                warn!(error = %queue_error, "Offline queue rejected request");
                OrchestrationOutcome::failed(&request.id, queue_error, attempts)
            }
        }
    }

    async fn enqueue(&self, request: &Request) -> Result<String, OrchestratorError> {
        let priority = if request.priority {
            MessagePriority::High
        } else {
            MessagePriority::Normal
        };
        let message = QueuedMessage::new(&request.id, &self.config.service_name, request.body().to_string())
            .with_priority(priority)
            .with_header("X-Request-ID", &request.id);
        Ok(self.queue.enqueue(message).await?)
    }

    /// Starts delivering queued requests in the background.
    ///
    /// Delivered requests run through the same interpret → translate →
    /// execute pipeline and notify the listeners.
    pub fn start_queue_processor(self: &Arc<Self>) -> ProcessorHandle {
        let sink = Arc::new(sink::QueuedRequestSink::new(Arc::clone(self)));
        let processor = QueueProcessor::new(Arc::clone(&self.queue), sink, Arc::clone(&self.recovery));
        Arc::new(processor).spawn()
    }

    /// Cancels a request that has not reached a terminal state
    pub fn cancel(&self, request_id: &str) -> bool {
        match lock(&self.active).get(request_id) {
            Some(entry) => {
                let _ = entry.cancel.send(true);
                info!(request_id = %request_id, "Request cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Ids of requests still in flight
    pub fn active_requests(&self) -> Vec<String> {
        lock(&self.active).keys().cloned().collect()
    }

    pub fn request_state(&self, request_id: &str) -> Option<RequestState> {
        lock(&self.active).get(request_id).map(|entry| entry.state)
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.snapshot()
    }

    /// Terminal bookkeeping shared by live and queued requests
    pub(crate) fn finish(&self, outcome: &OrchestrationOutcome) {
        self.stats.record_terminal(outcome.state);
        counter!("orchestrator_requests_total", 1, "state" => outcome.state.as_str());
        info!(
            state = %outcome.state,
            attempts = outcome.attempts,
            "Request finished"
        );
        self.notify(&outcome.display_text);
    }

    fn notify(&self, display_text: &str) {
        for listener in &self.listeners {
            listener.on_response_ready(display_text);
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
