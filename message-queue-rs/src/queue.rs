//! # Priority Message Queue
//!
//! Messages are ordered by `(priority, sequence)` in a binary heap: higher
//! priority first, and within a priority the lowest enqueue sequence first.
//! The heap only holds ids; the authoritative record lives in a map, and heap
//! entries whose message left the `Queued` state are skipped lazily.
//!
//! A message stays tracked while it is queued, in flight or failed, and is
//! removed on acknowledgement, expiry, or fire-and-forget failure.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Serialize, Deserialize};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::persistence::MessagePersistence;
use crate::rate_limit::TokenBucket;
use crate::types::{DeliveryMode, MessagePriority, MessageStatus, QueuedMessage};

/// Counters and current occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub retried: u64,
    pub expired: u64,
    pub rejected: u64,
    pub rate_limited: u64,
    /// Messages waiting to be dequeued
    pub queued: usize,
    /// Messages handed out and not yet acknowledged
    pub in_flight: usize,
    /// Messages that exhausted their retries
    pub failed_pending: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    priority: MessagePriority,
    sequence: u64,
    id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Tracked {
    message: QueuedMessage,
    sequence: u64,
}

#[derive(Debug)]
struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    messages: HashMap<String, Tracked>,
    next_sequence: u64,
    bucket: TokenBucket,
    stats: QueueStats,
}

impl QueueState {
    fn count(&self, status: MessageStatus) -> usize {
        self.messages
            .values()
            .filter(|tracked| tracked.message.status == status)
            .count()
    }

    fn schedule(&mut self, id: &str) {
        if let Some(tracked) = self.messages.get(id) {
            self.heap.push(HeapEntry {
                priority: tracked.message.priority,
                sequence: tracked.sequence,
                id: id.to_string(),
            });
        }
    }

    fn insert(&mut self, message: QueuedMessage) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = message.id.clone();
        let queued = message.status == MessageStatus::Queued;
        self.messages.insert(id.clone(), Tracked { message, sequence });
        if queued {
            self.schedule(&id);
        }
        gauge!("message_queue_tracked", self.messages.len() as f64);
    }
}

/// Bounded, rate-limited priority queue of outbound messages
pub struct MessageQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    persistence: Option<Arc<dyn MessagePersistence>>,
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("config", &self.config)
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        let bucket = TokenBucket::new(config.messages_per_second, config.burst_size);
        Self {
            config,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                messages: HashMap::new(),
                next_sequence: 0,
                bucket,
                stats: QueueStats::default(),
            }),
            notify: Notify::new(),
            persistence: None,
        }
    }

    /// Mirrors every change into `store`
    pub fn with_persistence(mut self, store: Arc<dyn MessagePersistence>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds a message, returning its id.
    ///
    /// Rejected when the content is blank, the body is oversized, the id is
    /// already tracked, or the queue is at capacity.
    pub async fn enqueue(&self, mut message: QueuedMessage) -> Result<String> {
        let mut state = self.state.lock().await;

        let rejection = if message.content.trim().is_empty() {
            Some(QueueError::EmptyContent)
        } else if message.body_size() > self.config.max_message_bytes {
            Some(QueueError::MessageTooLarge {
                size: message.body_size(),
                limit: self.config.max_message_bytes,
            })
        } else if state.messages.contains_key(&message.id) {
            Some(QueueError::Duplicate(message.id.clone()))
        } else if state.messages.len() >= self.config.max_queue_size {
            Some(QueueError::QueueFull {
                capacity: self.config.max_queue_size,
            })
        } else {
            None
        };

        if let Some(error) = rejection {
            state.stats.rejected += 1;
            counter!("message_queue_rejected_total", 1);
            warn!(message_id = %message.id, request_id = %message.request_id, error = %error, "Message rejected");
            return Err(error);
        }

        message.status = MessageStatus::Queued;
        if message.expires_at.is_none() {
            if let Some(ttl) = self.config.default_ttl {
                message = message.with_ttl(ttl);
            }
        }

        let id = message.id.clone();
        state.insert(message.clone());
        state.stats.enqueued += 1;
        drop(state);

        self.notify.notify_one();
        self.persist(&message).await;

        counter!("message_queue_enqueued_total", 1, "priority" => message.priority.to_string());
        debug!(message_id = %id, priority = %message.priority, service = %message.service, "Message enqueued");
        Ok(id)
    }

    /// Hands out the highest-priority, oldest eligible message.
    ///
    /// `Ok(None)` when nothing is queued; `Err(RateLimited)` when a message
    /// is available but the dequeue rate is exhausted. Expired messages met
    /// on the way are dropped.
    pub async fn try_dequeue(&self) -> Result<Option<QueuedMessage>> {
        let now = Utc::now();
        let mut expired = Vec::new();

        let result = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            loop {
                let (id, sequence) = match state.heap.peek() {
                    Some(entry) => (entry.id.clone(), entry.sequence),
                    None => break Ok(None),
                };

                // The sequence check skips entries left behind by an earlier
                // message that was removed and whose id has since been reused
                let eligible = state
                    .messages
                    .get(&id)
                    .filter(|tracked| tracked.sequence == sequence)
                    .filter(|tracked| tracked.message.status == MessageStatus::Queued)
                    .map(|tracked| !tracked.message.is_expired_at(now));

                match eligible {
                    // Stale heap entry
                    None => {
                        state.heap.pop();
                        continue;
                    }
                    Some(false) => {
                        state.heap.pop();
                        state.messages.remove(&id);
                        state.stats.expired += 1;
                        expired.push(id);
                        continue;
                    }
                    Some(true) => {}
                }

                if let Err(retry_after) = state.bucket.try_acquire() {
                    state.stats.rate_limited += 1;
                    break Err(QueueError::RateLimited { retry_after });
                }

                state.heap.pop();
                match state.messages.get_mut(&id) {
                    Some(tracked) => {
                        tracked.message.status = MessageStatus::Sent;
                        tracked.message.last_attempt = Some(now);
                        state.stats.dequeued += 1;
                        break Ok(Some(tracked.message.clone()));
                    }
                    None => continue,
                }
            }
        };

        for id in &expired {
            debug!(message_id = %id, "Expired message dropped at dequeue");
            self.forget(id).await;
        }
        if let Ok(Some(message)) = &result {
            counter!("message_queue_dequeued_total", 1);
            self.persist(message).await;
        }
        result
    }

    /// Like `try_dequeue`, but waits up to `wait` for a message or a token
    pub async fn dequeue(&self, wait: Duration) -> Option<QueuedMessage> {
        let deadline = Instant::now() + wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.try_dequeue().await {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {
                    if remaining.is_zero() {
                        return None;
                    }
                    let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
                }
                Err(QueueError::RateLimited { retry_after }) => {
                    if remaining.is_zero() {
                        return None;
                    }
                    tokio::time::sleep(retry_after.min(remaining)).await;
                }
                Err(e) => {
                    warn!(error = %e, "Dequeue failed");
                    return None;
                }
            }

            if Instant::now() >= deadline {
                // One last non-blocking look before giving up
                return self.try_dequeue().await.ok().flatten();
            }
        }
    }

    /// Confirms delivery; a negative acknowledgement counts as a failure
    pub async fn acknowledge(&self, id: &str, success: bool) -> Result<()> {
        if !success {
            return self.report_failure(id, "negative acknowledgement").await.map(|_| ());
        }

        {
            let mut state = self.state.lock().await;
            let status = state
                .messages
                .get(id)
                .map(|tracked| tracked.message.status)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if status != MessageStatus::Sent {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: status,
                    to: MessageStatus::Acknowledged,
                });
            }

            state.messages.remove(id);
            state.stats.acknowledged += 1;
        }

        counter!("message_queue_acknowledged_total", 1);
        self.forget(id).await;
        Ok(())
    }

    /// Records a failed delivery attempt.
    ///
    /// The message is re-queued while attempts stay within `max_retries`,
    /// otherwise it becomes `Failed`. Fire-and-forget messages are dropped.
    pub async fn report_failure(&self, id: &str, error: &str) -> Result<MessageStatus> {
        let (message, dropped) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let tracked = state
                .messages
                .get_mut(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if tracked.message.status != MessageStatus::Sent {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: tracked.message.status,
                    to: MessageStatus::Failed,
                });
            }

            let message = &mut tracked.message;
            message.attempt_count += 1;
            message.last_error = Some(error.to_string());

            if message.delivery_mode == DeliveryMode::FireAndForget {
                message.status = MessageStatus::Failed;
                state.stats.failed += 1;
                let removed = state.messages.remove(id).map(|tracked| tracked.message);
                (removed, true)
            } else if message.attempt_count > message.max_retries {
                message.status = MessageStatus::Failed;
                state.stats.failed += 1;
                (Some(message.clone()), false)
            } else {
                message.status = MessageStatus::Queued;
                let snapshot = message.clone();
                state.schedule(id);
                (Some(snapshot), false)
            }
        };

        let message = message.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let status = message.status;

        match status {
            MessageStatus::Queued => {
                self.notify.notify_one();
                debug!(message_id = %id, attempts = message.attempt_count, error = %error, "Message re-queued");
            }
            _ => {
                counter!("message_queue_failed_total", 1);
                warn!(
                    message_id = %id,
                    request_id = %message.request_id,
                    attempts = message.attempt_count,
                    dropped = dropped,
                    error = %error,
                    "Message delivery failed"
                );
            }
        }

        if dropped {
            self.forget(id).await;
        } else {
            self.persist(&message).await;
        }
        Ok(status)
    }

    /// Moves an in-flight message straight to `Failed`, for errors no retry can fix
    pub async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let message = {
            let mut state = self.state.lock().await;
            let tracked = state
                .messages
                .get_mut(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if !tracked.message.status.can_transition_to(MessageStatus::Failed) {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: tracked.message.status,
                    to: MessageStatus::Failed,
                });
            }

            tracked.message.attempt_count += 1;
            tracked.message.status = MessageStatus::Failed;
            tracked.message.last_error = Some(error.to_string());
            let message = tracked.message.clone();
            state.stats.failed += 1;
            message
        };

        counter!("message_queue_failed_total", 1);
        self.persist(&message).await;
        Ok(())
    }

    /// Returns an in-flight message to the queue without charging an attempt
    pub async fn release(&self, id: &str) -> Result<()> {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let tracked = state
                .messages
                .get_mut(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if tracked.message.status != MessageStatus::Sent {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: tracked.message.status,
                    to: MessageStatus::Queued,
                });
            }
            tracked.message.status = MessageStatus::Queued;
            state.schedule(id);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Removes queued and failed messages whose expiry lies strictly in the past
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let purged: Vec<String> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .messages
                .values()
                .filter(|tracked| {
                    matches!(tracked.message.status, MessageStatus::Queued | MessageStatus::Failed)
                        && tracked.message.is_expired_at(now)
                })
                .map(|tracked| tracked.message.id.clone())
                .collect();

            for id in &ids {
                state.messages.remove(id);
            }
            state.stats.expired += ids.len() as u64;
            ids
        };

        for id in &purged {
            self.forget(id).await;
        }
        if !purged.is_empty() {
            counter!("message_queue_expired_total", purged.len() as u64);
            info!(count = purged.len(), "Purged expired messages");
        }
        purged.len()
    }

    /// Re-queues every failed message with a fresh attempt budget
    pub async fn retry_failed_messages(&self) -> usize {
        let retried: Vec<QueuedMessage> = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let ids: Vec<String> = state
                .messages
                .values()
                .filter(|tracked| tracked.message.status == MessageStatus::Failed)
                .map(|tracked| tracked.message.id.clone())
                .collect();

            let mut retried = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(tracked) = state.messages.get_mut(id) {
                    tracked.message.status = MessageStatus::Queued;
                    tracked.message.attempt_count = 0;
                    retried.push(tracked.message.clone());
                }
                state.schedule(id);
            }
            state.stats.retried += retried.len() as u64;
            retried
        };

        if !retried.is_empty() {
            self.notify.notify_waiters();
            self.notify.notify_one();
            info!(count = retried.len(), "Failed messages re-queued");
        }
        for message in &retried {
            self.persist(message).await;
        }
        retried.len()
    }

    /// Removes and returns every failed message
    pub async fn drain_failed(&self) -> Vec<QueuedMessage> {
        let drained: Vec<QueuedMessage> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .messages
                .values()
                .filter(|tracked| tracked.message.status == MessageStatus::Failed)
                .map(|tracked| tracked.message.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.messages.remove(id))
                .map(|tracked| tracked.message)
                .collect()
        };

        for message in &drained {
            self.forget(&message.id).await;
        }
        drained
    }

    /// Reloads queued and failed messages from the persistence hook
    pub async fn restore(&self) -> Result<usize> {
        let store = match &self.persistence {
            Some(store) => store.clone(),
            None => return Ok(0),
        };

        let now = Utc::now();
        let mut stored = store.load().await?;
        stored.sort_by_key(|message| message.created_at);

        let mut restored = 0;
        {
            let mut state = self.state.lock().await;
            for mut message in stored {
                if message.is_expired_at(now)
                    || message.status.is_terminal()
                    || state.messages.contains_key(&message.id)
                    || state.messages.len() >= self.config.max_queue_size
                {
                    continue;
                }
                // Delivery of an in-flight message is unknown after a restart
                if message.status == MessageStatus::Sent {
                    message.status = MessageStatus::Queued;
                }
                state.insert(message);
                restored += 1;
            }
        }

        if restored > 0 {
            self.notify.notify_waiters();
            self.notify.notify_one();
            info!(count = restored, "Messages restored from persistence");
        }
        Ok(restored)
    }

    pub async fn get(&self, id: &str) -> Option<QueuedMessage> {
        self.state
            .lock()
            .await
            .messages
            .get(id)
            .map(|tracked| tracked.message.clone())
    }

    pub async fn status(&self, id: &str) -> Option<MessageStatus> {
        self.state
            .lock()
            .await
            .messages
            .get(id)
            .map(|tracked| tracked.message.status)
    }

    /// Messages waiting to be dequeued
    pub async fn len(&self) -> usize {
        self.state.lock().await.count(MessageStatus::Queued)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.count(MessageStatus::Failed)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            queued: state.count(MessageStatus::Queued),
            in_flight: state.count(MessageStatus::Sent),
            failed_pending: state.count(MessageStatus::Failed),
            ..state.stats.clone()
        }
    }

    async fn persist(&self, message: &QueuedMessage) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.store(message).await {
                warn!(message_id = %message.id, error = %e, "Failed to persist message");
            }
        }
    }

    async fn forget(&self, id: &str) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.remove(id).await {
                warn!(message_id = %id, error = %e, "Failed to remove persisted message");
            }
        }
    }
}
