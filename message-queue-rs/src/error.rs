//! Queue errors

use std::time::Duration;
use thiserror::Error;
use crate::types::MessageStatus;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Reasons a queue operation is refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("message content is empty")]
    EmptyContent,

    #[error("message body of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("message {0} is already queued")]
    Duplicate(String),

    #[error("message {0} not found")]
    NotFound(String),

    #[error("message {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("dequeue rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl QueueError {
    /// Whether the message was rejected at enqueue time
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            QueueError::QueueFull { .. }
                | QueueError::EmptyContent
                | QueueError::MessageTooLarge { .. }
                | QueueError::Duplicate(_)
        )
    }
}
