//! Queue configuration

use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Default upper bound on tracked messages
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default upper bound on a message body
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Limits applied by a `MessageQueue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of messages tracked at once (queued, in flight or failed)
    pub max_queue_size: usize,
    /// Maximum body size in bytes
    pub max_message_bytes: usize,
    /// TTL applied to messages without an explicit expiry; `None` keeps them forever
    #[serde(with = "optional_secs")]
    pub default_ttl: Option<Duration>,
    /// Sustained dequeue rate; 0 disables rate limiting
    pub messages_per_second: u32,
    /// Dequeues allowed in a burst above the sustained rate
    pub burst_size: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            default_ttl: Some(Duration::from_secs(300)),
            messages_per_second: 10,
            burst_size: 20,
        }
    }
}

impl QueueConfig {
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_rate_limit(mut self, messages_per_second: u32, burst_size: u32) -> Self {
        self.messages_per_second = messages_per_second;
        self.burst_size = burst_size;
        self
    }

    /// No rate limiting at all
    pub fn unlimited(mut self) -> Self {
        self.messages_per_second = 0;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }
}

mod optional_secs {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ttl) => serializer.serialize_some(&ttl.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"max_queue_size": 5, "default_ttl": 30}"#).unwrap();
        assert_eq!(config.max_queue_size, 5);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.burst_size, QueueConfig::default().burst_size);
    }
}
