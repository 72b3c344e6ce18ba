//! # Discovery Connector Framework
//!
//! Core abstractions for pulling identity, resource and privilege records
//! out of external systems.
//!
//! ## Architecture
//!
//! - [`DiscoveryConnector`] - Contract every vendor connector implements
//! - [`ConnectorRegistry`] - Explicit name-to-factory map; loads a plugin section
//! - [`ScopeScheduler`] - Fans a connector out over its scopes with a
//!   concurrency limit and per-scope failure isolation
//! - [`Normalizer`] - Tags records with `ObjectType`/`Source` and deduplicates
//!   them across scopes
//!
//! Vendor calls are built from a few shared pieces: [`paginate`] for every
//! paging style, [`TokenCache`] for OAuth tokens, and [`VendorHttp`] which
//! applies the retry and rate-limit policies.
//!
//! ## Example
//!
//! ```ignore
//! use sightline_connector::prelude::*;
//!
//! let mut registry = ConnectorRegistry::new();
//! registry.register("entraid", || Box::new(EntraConnector::entra_id()));
//!
//! let outcome = registry.load(&plugins, &ConnectorContext::default()).await;
//! for loaded in outcome.loaded {
//!     let run = ScopeScheduler::default()
//!         .discover(loaded.handle, &loaded.config)
//!         .await?;
//!     println!("{}: {} records", run.connector, run.records.len());
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod http;
pub mod normalize;
pub mod oauth;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod token;
pub mod traits;
pub mod types;

pub use async_trait::async_trait;

pub use config::{expand_scopes, PluginSettings, Scope, Watermark};
pub use cursor::{collect_pages, paginate, Page, PageCursor};
pub use error::{ConnectorError, ConnectorResult};
pub use http::{RequestAuth, VendorHttp, VendorResponse};
pub use normalize::Normalizer;
pub use registry::ConnectorRegistry;
pub use scheduler::ScopeScheduler;
pub use token::TokenCache;
pub use traits::{ConnectorContext, DiscoveryConnector, ExecutionMode};

/// Prelude module for convenient imports.
///
/// ```
/// use sightline_connector::prelude::*;
/// ```
pub mod prelude {
    // Contract
    pub use crate::traits::{ConnectorContext, DiscoveryConnector, ExecutionMode, SharedConnector};

    // Records
    pub use crate::types::{ConfigBlob, NormalizedRecord, ObjectType, RawRecord, RecordCategory};

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult};

    // Configuration
    pub use crate::config::{expand_scopes, parse_settings, PluginSettings, Scope, Watermark};

    // Registry and scheduling
    pub use crate::registry::{ConnectorRegistry, LoadOutcome, LoadedConnector, SkipReason};
    pub use crate::scheduler::{ConnectorRun, FetchKind, ScopeOutcome, ScopeReport, ScopeScheduler};

    // Vendor plumbing
    pub use crate::cursor::{collect_pages, paginate, Page, PageCursor};
    pub use crate::http::{RequestAuth, VendorHttp, VendorResponse};
    pub use crate::oauth::{OAuthExchange, OAuthGrant};
    pub use crate::resilience::{RateLimitPolicy, RetryPolicy, RetrySettings};
    pub use crate::token::{CredentialExchange, IssuedToken, StaticToken, TokenCache};

    pub use async_trait::async_trait;
}
