//! Kafka publisher.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::KafkaConfig;
use crate::error::EventError;
use crate::publisher::{Delivery, Publisher};

/// Publishes records to Kafka with `acks=all`.
///
/// The producer is created by `start`; `send` before that fails with
/// [`EventError::NotStarted`].
pub struct KafkaPublisher {
    config: KafkaConfig,
    producer: Option<FutureProducer>,
}

impl KafkaPublisher {
    #[must_use]
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            producer: None,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("client.id", &self.config.client_id)
            .set("security.protocol", self.config.security_protocol.as_str())
            .set(
                "message.timeout.ms",
                self.config.send_timeout.as_millis().to_string(),
            )
            .set("acks", "all");

        if let Some(sasl) = &self.config.sasl {
            client_config
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        client_config
    }

    fn producer(&self) -> Result<&FutureProducer, EventError> {
        self.producer.as_ref().ok_or(EventError::NotStarted)
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn start(&mut self) -> Result<(), EventError> {
        if self.producer.is_some() {
            return Ok(());
        }
        let producer: FutureProducer =
            self.client_config()
                .create()
                .map_err(|e| EventError::ConnectionFailed {
                    broker: self.config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                })?;

        info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            client_id = %self.config.client_id,
            "Kafka publisher started"
        );
        self.producer = Some(producer);
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        record: &Value,
    ) -> Result<Delivery, EventError> {
        let producer = self.producer()?;
        let payload = serde_json::to_vec(record).map_err(|e| EventError::SerializationFailed {
            topic: topic.to_string(),
            cause: e.to_string(),
        })?;

        let mut message = FutureRecord::<str, [u8]>::to(topic).payload(&payload);
        if let Some(key) = key {
            message = message.key(key);
        }

        let (partition, offset) = producer
            .send(message, self.config.send_timeout)
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                topic: topic.to_string(),
                cause: err.to_string(),
            })?;

        debug!(partition, offset, payload_size = payload.len(), "Record published");
        Ok(Delivery { partition, offset })
    }

    async fn flush(&self) -> Result<(), EventError> {
        let producer = self.producer()?;
        producer
            .flush(self.config.send_timeout)
            .map_err(|e| EventError::FlushFailed {
                cause: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), EventError> {
        if let Some(producer) = self.producer.take() {
            let result = producer.flush(self.config.send_timeout);
            info!("Kafka publisher closed");
            result.map_err(|e| EventError::FlushFailed {
                cause: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> KafkaConfig {
        KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .client_id("test")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let publisher = KafkaPublisher::new(config());
        let err = publisher
            .send("discovery-identity", None, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_is_lazy_and_close_is_idempotent() {
        // Creating the producer does not contact the broker.
        let mut publisher = KafkaPublisher::new(config());
        publisher.start().await.unwrap();
        publisher.close().await.ok();
        assert!(publisher.close().await.is_ok());
    }
}
