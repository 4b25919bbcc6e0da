//! Message model
//!
//! `QueuedMessage` plus its priority, delivery mode and lifecycle status.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Retries granted to a message unless overridden
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default content type of queued payloads
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Delivery priority; declaration order is ascending so `Ord` ranks Critical highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePriority::Low => write!(f, "low"),
            MessagePriority::Normal => write!(f, "normal"),
            MessagePriority::High => write!(f, "high"),
            MessagePriority::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting in the queue
    Queued,
    /// Handed to a consumer, awaiting acknowledgement
    Sent,
    /// Delivered and confirmed
    Acknowledged,
    /// Retries exhausted; eligible for `retry_failed_messages`
    Failed,
    /// TTL elapsed before delivery
    Expired,
}

impl MessageStatus {
    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Queued, Sent)
                | (Queued, Expired)
                | (Sent, Acknowledged)
                | (Sent, Queued)
                | (Sent, Failed)
                | (Failed, Queued)
                | (Failed, Expired)
        )
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Acknowledged | MessageStatus::Expired)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Queued => write!(f, "queued"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Acknowledged => write!(f, "acknowledged"),
            MessageStatus::Failed => write!(f, "failed"),
            MessageStatus::Expired => write!(f, "expired"),
        }
    }
}

/// How hard the queue tries to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One attempt; dropped on failure
    FireAndForget,
    /// Retried until acknowledged or retries are exhausted
    AtLeastOnce,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::AtLeastOnce
    }
}

/// A message tracked by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    /// Request the message belongs to
    pub request_id: String,
    /// Service the message is addressed to
    pub service: String,
    pub content: String,
    pub content_type: String,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub delivery_mode: DeliveryMode,
    pub created_at: DateTime<Utc>,
    /// `None` means the queue's default TTL applies (or never, if it has none)
    pub expires_at: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub max_retries: u32,
    /// Most recent delivery error
    pub last_error: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QueuedMessage {
    /// Creates a normal-priority, at-least-once message
    pub fn new(request_id: impl Into<String>, service: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            service: service.into(),
            content: content.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            priority: MessagePriority::default(),
            status: MessageStatus::Queued,
            delivery_mode: DeliveryMode::default(),
            created_at: Utc::now(),
            expires_at: None,
            last_attempt: None,
            attempt_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            headers: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Expires the message `ttl` after its creation
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        self
    }

    /// Sets an absolute expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the expiry lies strictly before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| now > expiry).unwrap_or(false)
    }

    /// Size used for the oversized-body check
    pub fn body_size(&self) -> usize {
        self.content.len()
    }
}
