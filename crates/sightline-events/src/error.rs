//! Error types for the sightline-events crate.

use thiserror::Error;

/// Errors that can occur while publishing discovered records.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Connection errors
    /// Failed to connect to the broker.
    #[error("Connection to broker {broker} failed: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    // Lifecycle errors
    /// `send` or `flush` was called before `start` or after `close`.
    #[error("Publisher is not started")]
    NotStarted,

    // Publishing errors
    /// Failed to publish a record to a topic.
    #[error("Failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    /// Failed to serialize a record.
    #[error("Failed to serialize record for topic {topic}: {cause}")]
    SerializationFailed { topic: String, cause: String },

    /// Outstanding messages were not delivered before the flush timeout.
    #[error("Flush failed: {cause}")]
    FlushFailed { cause: String },

    // Internal Kafka errors
    /// Internal Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl EventError {
    /// Returns true if this error is transient and can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::ConnectionFailed { .. }
                | EventError::PublishFailed { .. }
                | EventError::FlushFailed { .. }
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EventError::ConfigMissing { .. } | EventError::ConfigInvalid { .. }
        )
    }
}
