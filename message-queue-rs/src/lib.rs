//! # Message Queue
//!
//! In-memory priority queue for outbound request messages, used by the
//! orchestrator to hold work while the backend is unreachable.
//!
//! ## Features
//!
//! - Priority ordering with FIFO within a priority
//! - Per-message TTL with a configurable default and explicit purging
//! - Retry tracking with failed-message recovery
//! - Token-bucket rate limiting of dequeues
//! - Optional persistence hook for durable hosts
//! - Background processor delivering through a `MessageSink`
//!

pub mod types;
pub mod error;
pub mod config;
pub mod rate_limit;
pub mod persistence;
pub mod queue;
pub mod processor;

// Re-export commonly used types
pub use types::{DeliveryMode, MessagePriority, MessageStatus, QueuedMessage, DEFAULT_MAX_RETRIES};
pub use error::{QueueError, Result};
pub use config::QueueConfig;
pub use rate_limit::TokenBucket;
pub use persistence::MessagePersistence;
pub use queue::{MessageQueue, QueueStats};
pub use processor::{DeliveryOutcome, MessageSink, ProcessorConfig, ProcessorHandle, QueueProcessor};
