//! # sightline-discovery
//!
//! Ties the connector framework to the publish pipeline.
//!
//! - [`DiscoveryConfig`] - YAML service config: plugin sections, topics,
//!   scheduler defaults
//! - [`builtin_registry`] - Every connector shipped with the service
//! - [`RunCoordinator`] - Loads, discovers and publishes one run
//! - [`RunReport`] - What happened, including every partial failure
//!
//! ```rust,ignore
//! let config = DiscoveryConfig::from_path("config/discovery.yml")?;
//! let mut publisher = MemoryPublisher::new();
//! let report = RunCoordinator::new(builtin_registry())
//!     .run(&config, &mut publisher)
//!     .await;
//! println!("{report}");
//! ```

pub mod builtin;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod report;

pub use builtin::builtin_registry;
pub use config::{DiscoveryConfig, PluginSection, PublishConfig, SchedulerConfig, TopicMap};
pub use coordinator::RunCoordinator;
pub use error::DiscoveryError;
pub use report::{FailedConnector, FailedScope, RunReport};
