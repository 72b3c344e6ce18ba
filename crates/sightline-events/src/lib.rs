//! # sightline-events
//!
//! Publish pipeline for discovered records.
//!
//! The discovery core only knows the [`Publisher`] contract. Two
//! implementations ship here: [`MemoryPublisher`] for dry runs and tests,
//! and `KafkaPublisher` for production.
//!
//! ## Cargo Features
//!
//! - `kafka`: Enable the Kafka publisher (requires librdkafka)
//!
//! ## Example
//!
//! ```rust,ignore
//! use sightline_events::{KafkaConfig, KafkaPublisher, Publisher};
//!
//! let mut publisher = KafkaPublisher::new(KafkaConfig::from_env()?);
//! publisher.start().await?;
//! publisher.send("discovery-identity", Some("user-1"), &record).await?;
//! publisher.flush().await?;
//! publisher.close().await?;
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod publisher;

#[cfg(feature = "kafka")]
pub mod producer;

pub use config::{KafkaConfig, KafkaConfigBuilder, SaslMechanism, SecurityProtocol};
pub use error::EventError;
pub use memory::{MemoryPublisher, PublishedRecord};
pub use publisher::{Delivery, Publisher};

#[cfg(feature = "kafka")]
pub use producer::KafkaPublisher;
