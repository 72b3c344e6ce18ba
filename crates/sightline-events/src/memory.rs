//! In-memory publisher used for dry runs and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::error::EventError;
use crate::publisher::{Delivery, Publisher};

/// One record accepted by a [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: Option<String>,
    pub record: Value,
}

/// Keeps every sent record in memory.
///
/// Sends to a topic listed in `failing_topics` are rejected, which lets
/// tests exercise partial publish failures.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    records: Mutex<Vec<PublishedRecord>>,
    failing_topics: HashSet<String>,
    started: AtomicBool,
    closed: AtomicBool,
    flushes: Mutex<usize>,
}

impl MemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send to `topic`.
    #[must_use]
    pub fn failing_on(mut self, topic: impl Into<String>) -> Self {
        self.failing_topics.insert(topic.into());
        self
    }

    /// Everything sent so far, in send order.
    pub fn records(&self) -> Vec<PublishedRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records sent to `topic`.
    pub fn records_for(&self, topic: &str) -> Vec<PublishedRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.topic == topic)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        match self.flushes.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn start(&mut self) -> Result<(), EventError> {
        self.started.store(true, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        record: &Value,
    ) -> Result<Delivery, EventError> {
        if !self.started.load(Ordering::SeqCst) || self.is_closed() {
            return Err(EventError::NotStarted);
        }
        if self.failing_topics.contains(topic) {
            return Err(EventError::PublishFailed {
                topic: topic.to_string(),
                cause: "topic rejected by memory publisher".to_string(),
            });
        }

        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(PublishedRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            record: record.clone(),
        });
        let offset = records.len() as i64 - 1;
        debug!(topic = %topic, offset, "Record captured");
        Ok(Delivery {
            partition: 0,
            offset,
        })
    }

    async fn flush(&self) -> Result<(), EventError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EventError::NotStarted);
        }
        match self.flushes.lock() {
            Ok(mut guard) => *guard += 1,
            Err(poisoned) => *poisoned.into_inner() += 1,
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EventError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_captures_in_order() {
        let mut publisher = MemoryPublisher::new();
        publisher.start().await.unwrap();

        let first = publisher
            .send("discovery-identity", Some("u1"), &json!({"id": "u1"}))
            .await
            .unwrap();
        let second = publisher
            .send("discovery-resource", None, &json!({"id": "r1"}))
            .await
            .unwrap();
        publisher.flush().await.unwrap();
        publisher.close().await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(publisher.records_for("discovery-identity").len(), 1);
        assert_eq!(publisher.records()[0].key.as_deref(), Some("u1"));
        assert_eq!(publisher.flush_count(), 1);
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_send_requires_start() {
        let publisher = MemoryPublisher::new();
        let err = publisher
            .send("discovery-identity", None, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::NotStarted));
    }

    #[tokio::test]
    async fn test_failing_topic() {
        let mut publisher = MemoryPublisher::new().failing_on("discovery-privilege");
        publisher.start().await.unwrap();

        assert!(publisher
            .send("discovery-privilege", None, &json!({}))
            .await
            .is_err());
        assert!(publisher
            .send("discovery-identity", None, &json!({}))
            .await
            .is_ok());
        assert_eq!(publisher.records().len(), 1);
    }
}
