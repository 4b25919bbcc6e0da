//! # Queue Processor
//!
//! Drains a `MessageQueue` into a `MessageSink`, consulting the shared
//! `ErrorRecoveryManager` before each delivery and after each failure. Each
//! message id doubles as the recovery context key, so retries of one message
//! accumulate a single failure history.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use error_recovery_rs::{Error, ErrorRecoveryManager};
use metrics::counter;
use serde::{Serialize, Deserialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::queue::MessageQueue;
use crate::types::{MessageStatus, QueuedMessage};

/// Destination of dequeued messages
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Delivers one message; the error is classified by the recovery manager
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), Error>;
}

/// What happened to a dequeued message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// Delivered and acknowledged
    Delivered { id: String },
    /// Delivery failed and the message was re-queued
    Retrying { id: String, delay: Duration },
    /// Delivery failed for good
    Failed { id: String },
    /// The service's circuit refused the attempt; the message went back untouched
    Deferred { id: String },
}

/// Loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Wait for new messages when the queue is empty
    pub poll_interval: Duration,
    /// How often expired messages are purged
    pub purge_interval: Duration,
    /// Pause after a deferral caused by an open circuit
    pub circuit_backoff: Duration,
    /// Upper bound on the pause after a retryable failure
    pub max_retry_pause: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            purge_interval: Duration::from_secs(30),
            circuit_backoff: Duration::from_secs(1),
            max_retry_pause: Duration::from_secs(5),
        }
    }
}

/// Handle to a spawned processor loop
#[derive(Debug)]
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Signals the loop and waits for the in-progress delivery to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct QueueProcessor {
    queue: Arc<MessageQueue>,
    sink: Arc<dyn MessageSink>,
    recovery: Arc<ErrorRecoveryManager>,
    config: ProcessorConfig,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<MessageQueue>,
        sink: Arc<dyn MessageSink>,
        recovery: Arc<ErrorRecoveryManager>,
    ) -> Self {
        Self {
            queue,
            sink,
            recovery,
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Dequeues and delivers at most one message.
    ///
    /// `None` when nothing could be dequeued, either because the queue is
    /// empty or because the dequeue rate is exhausted.
    pub async fn process_next(&self) -> Option<DeliveryOutcome> {
        let message = match self.queue.try_dequeue().await {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(QueueError::RateLimited { retry_after }) => {
                debug!(retry_after_ms = retry_after.as_millis() as u64, "Processor rate limited");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Processor dequeue failed");
                return None;
            }
        };

        let id = message.id.clone();
        let service = message.service.clone();

        if !self.recovery.allow_request(&service) {
            if let Err(e) = self.queue.release(&id).await {
                warn!(message_id = %id, error = %e, "Failed to release deferred message");
            }
            debug!(message_id = %id, service = %service, "Delivery deferred by open circuit");
            return Some(DeliveryOutcome::Deferred { id });
        }

        match self.sink.deliver(&message).await {
            Ok(()) => {
                if let Err(e) = self.queue.acknowledge(&id, true).await {
                    warn!(message_id = %id, error = %e, "Acknowledgement failed");
                }
                self.recovery.report_success(&id, &service);
                counter!("queue_processor_delivered_total", 1, "service" => service);
                Some(DeliveryOutcome::Delivered { id })
            }
            Err(error) => Some(self.handle_failure(&message, error).await),
        }
    }

    async fn handle_failure(&self, message: &QueuedMessage, error: Error) -> DeliveryOutcome {
        let id = message.id.clone();
        let strategy = self.recovery.report_error(
            error.kind,
            &error.message,
            &id,
            &message.service,
            error.code,
            Some(error.context.clone()),
        );

        if !error.kind.is_retryable() {
            if let Err(e) = self.queue.fail(&id, &error.to_string()).await {
                warn!(message_id = %id, error = %e, "Failed to mark message failed");
            }
            self.recovery.abandon(&id);
            info!(message_id = %id, strategy = %strategy, "Message failed without retry");
            return DeliveryOutcome::Failed { id };
        }

        match self.queue.report_failure(&id, &error.to_string()).await {
            Ok(MessageStatus::Queued) => {
                let delay = self
                    .recovery
                    .calculate_retry_delay(&id, &message.service)
                    .min(self.config.max_retry_pause);
                DeliveryOutcome::Retrying { id, delay }
            }
            Ok(_) => {
                self.recovery.abandon(&id);
                DeliveryOutcome::Failed { id }
            }
            Err(e) => {
                warn!(message_id = %id, error = %e, "Failed to record delivery failure");
                self.recovery.abandon(&id);
                DeliveryOutcome::Failed { id }
            }
        }
    }

    /// Runs the delivery loop on a background task
    pub fn spawn(self: Arc<Self>) -> ProcessorHandle {
        let (shutdown, mut signal) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!("Queue processor started");
            let mut last_purge = Instant::now();

            loop {
                if *signal.borrow() {
                    break;
                }

                if last_purge.elapsed() >= self.config.purge_interval {
                    self.queue.purge_expired().await;
                    last_purge = Instant::now();
                }

                let pause = match self.process_next().await {
                    Some(DeliveryOutcome::Delivered { .. }) | Some(DeliveryOutcome::Failed { .. }) => None,
                    Some(DeliveryOutcome::Retrying { delay, .. }) => Some(delay),
                    Some(DeliveryOutcome::Deferred { .. }) => Some(self.config.circuit_backoff),
                    None => Some(self.config.poll_interval),
                };

                if let Some(pause) = pause {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        changed = signal.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            info!("Queue processor stopped");
        });

        ProcessorHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use error_recovery_rs::{ErrorKind, RetryPolicy};
    use crate::config::QueueConfig;

    /// Sink replaying a fixed script of results, then succeeding
    struct ScriptedSink {
        script: Mutex<Vec<Result<(), Error>>>,
        delivered: Mutex<Vec<String>>,
    }

    impl ScriptedSink {
        fn new(mut script: Vec<Result<(), Error>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSink for ScriptedSink {
        async fn deliver(&self, message: &QueuedMessage) -> Result<(), Error> {
            let next = self.script.lock().unwrap().pop().unwrap_or(Ok(()));
            if next.is_ok() {
                self.delivered.lock().unwrap().push(message.id.clone());
            }
            next
        }
    }

    fn recovery() -> Arc<ErrorRecoveryManager> {
        Arc::new(ErrorRecoveryManager::new(
            RetryPolicy::exponential(3, Duration::from_millis(5), Duration::from_millis(20), 2.0)
                .with_jitter(Duration::ZERO)
                .with_circuit_breaker(2, Duration::from_secs(60)),
        ))
    }

    fn queue() -> Arc<MessageQueue> {
        Arc::new(MessageQueue::new(QueueConfig::default().unlimited()))
    }

    #[tokio::test]
    async fn test_delivers_and_acknowledges() {
        let queue = queue();
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let processor = QueueProcessor::new(queue.clone(), sink.clone(), recovery());

        let id = queue.enqueue(QueuedMessage::new("req", "backend", "hello")).await.unwrap();
        assert_eq!(processor.process_next().await, Some(DeliveryOutcome::Delivered { id: id.clone() }));
        assert!(queue.get(&id).await.is_none());
        assert_eq!(*sink.delivered.lock().unwrap(), vec![id]);
        assert_eq!(processor.process_next().await, None);
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues() {
        let queue = queue();
        let sink = Arc::new(ScriptedSink::new(vec![Err(Error::new(ErrorKind::NetworkTimeout, "slow"))]));
        let recovery = recovery();
        let processor = QueueProcessor::new(queue.clone(), sink, recovery.clone());

        let id = queue.enqueue(QueuedMessage::new("req", "backend", "hello")).await.unwrap();
        let outcome = processor.process_next().await;
        assert!(matches!(outcome, Some(DeliveryOutcome::Retrying { .. })));
        assert_eq!(queue.status(&id).await, Some(MessageStatus::Queued));
        assert_eq!(recovery.error_context(&id).map(|ctx| ctx.attempt_count), Some(1));

        assert_eq!(processor.process_next().await, Some(DeliveryOutcome::Delivered { id: id.clone() }));
        assert!(recovery.error_context(&id).is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_fails_immediately() {
        let queue = queue();
        let sink = Arc::new(ScriptedSink::new(vec![Err(Error::classified(Some(400), "bad payload"))]));
        let recovery = recovery();
        let processor = QueueProcessor::new(queue.clone(), sink, recovery.clone());

        let id = queue.enqueue(QueuedMessage::new("req", "backend", "hello")).await.unwrap();
        assert_eq!(processor.process_next().await, Some(DeliveryOutcome::Failed { id: id.clone() }));
        assert_eq!(queue.status(&id).await, Some(MessageStatus::Failed));
        assert!(recovery.error_context(&id).is_none());
    }

    #[tokio::test]
    async fn test_open_circuit_defers_delivery() {
        let queue = queue();
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let recovery = recovery();
        for n in 0..2 {
            recovery.report_error(ErrorKind::ServerError, "down", &format!("other-{n}"), "backend", Some(500), None);
        }
        let processor = QueueProcessor::new(queue.clone(), sink.clone(), recovery);

        let id = queue.enqueue(QueuedMessage::new("req", "backend", "hello")).await.unwrap();
        assert_eq!(processor.process_next().await, Some(DeliveryOutcome::Deferred { id: id.clone() }));

        let message = queue.get(&id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Queued);
        assert_eq!(message.attempt_count, 0);
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_drains_and_stops() {
        let queue = queue();
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let processor = Arc::new(
            QueueProcessor::new(queue.clone(), sink.clone(), recovery()).with_config(ProcessorConfig {
                poll_interval: Duration::from_millis(10),
                ..ProcessorConfig::default()
            }),
        );

        for n in 0..3 {
            queue.enqueue(QueuedMessage::new(format!("req-{n}"), "backend", "hello")).await.unwrap();
        }

        let handle = processor.spawn();
        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.delivered.lock().unwrap().len() < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(sink.delivered.lock().unwrap().len(), 3);
        assert_eq!(queue.stats().await.acknowledged, 3);
    }
}
