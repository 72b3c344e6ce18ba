//! Publisher contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EventError;

/// Broker acknowledgement for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Sink for discovered records.
///
/// Lifecycle: `start`, any number of `send`, `flush`, then `close`.
/// Callers must call `close` even when `start` or `flush` failed.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Open connections to the sink.
    async fn start(&mut self) -> Result<(), EventError>;

    /// Publish one record and wait for its acknowledgement.
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        record: &Value,
    ) -> Result<Delivery, EventError>;

    /// Wait until every accepted record is delivered.
    async fn flush(&self) -> Result<(), EventError>;

    /// Release the sink. Safe to call more than once.
    async fn close(&mut self) -> Result<(), EventError>;
}
