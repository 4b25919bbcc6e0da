//! Optional persistence hook
//!
//! The queue itself is in-memory. A host that wants messages to survive a
//! restart plugs in a `MessagePersistence`; the queue mirrors every status
//! change into it and can reload from it on startup. Failures of the store
//! are logged and never fail a queue operation.

use async_trait::async_trait;
use crate::error::Result;
use crate::types::QueuedMessage;

/// Durable mirror of the queue's contents.
///
/// Implementations report failures as `QueueError::Persistence`.
#[async_trait]
pub trait MessagePersistence: Send + Sync {
    /// Inserts or overwrites a message
    async fn store(&self, message: &QueuedMessage) -> Result<()>;

    /// Forgets a message that left the queue
    async fn remove(&self, id: &str) -> Result<()>;

    /// Every stored message, for `MessageQueue::restore`
    async fn load(&self) -> Result<Vec<QueuedMessage>>;
}
