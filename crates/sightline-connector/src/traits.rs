//! Connector contract.
//!
//! A connector turns one configured external system into raw records. It
//! knows how to talk to its vendor and nothing else: scope fan-out,
//! deduplication, tagging and failure isolation belong to the
//! [`ScopeScheduler`](crate::scheduler::ScopeScheduler).

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Scope;
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::VendorHttp;
use crate::token::TokenCache;
use crate::types::{ConfigBlob, RawRecord};

/// How a connector's fetch methods should be driven.
///
/// Connectors whose client library blocks the calling thread declare
/// `Blocking`; the scheduler then runs each scope on the blocking pool
/// instead of awaiting it on a runtime worker.
///
/// A `Blocking` fetch is polled outside any tokio runtime context, so it
/// must not use tokio timers or I/O. Use
/// [`RetryPolicy::run_blocking`](crate::resilience::RetryPolicy::run_blocking)
/// for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Async,
    Blocking,
}

/// Process-wide services shared by every connector instance.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    pub token_cache: Arc<TokenCache>,
    pub http: VendorHttp,
}

impl ConnectorContext {
    #[must_use]
    pub fn new(token_cache: Arc<TokenCache>, http: VendorHttp) -> Self {
        Self { token_cache, http }
    }
}

impl Default for ConnectorContext {
    fn default() -> Self {
        Self {
            token_cache: Arc::new(TokenCache::new()),
            http: VendorHttp::default(),
        }
    }
}

/// A discovery connector.
///
/// Lifecycle: constructed by a factory, `validate_config` and `initialize`
/// once, then any number of concurrent `fetch_*` calls, one per scope.
#[async_trait]
pub trait DiscoveryConnector: Send + Sync {
    /// Registry name, also stamped on every record as `Source`.
    fn name(&self) -> &str;

    /// Check a config block without contacting the vendor.
    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()>;

    /// Store validated config and build clients.
    async fn initialize(&mut self, config: &ConfigBlob, ctx: &ConnectorContext)
        -> ConnectorResult<()>;

    /// Fetch identity and privilege records for one scope.
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>>;

    /// Fetch resource records for one scope.
    async fn fetch_resources(&self, _scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        Err(ConnectorError::unsupported(format!(
            "{}: fetch_resources",
            self.name()
        )))
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    /// Field under which the scope label is stamped on each record.
    ///
    /// `None` (the default) leaves records untagged.
    fn scope_tag(&self) -> Option<&'static str> {
        None
    }

    /// Config key overriding the scope concurrency limit, if the connector
    /// wants one besides `max_concurrent_scopes`.
    fn concurrency_key(&self) -> Option<&'static str> {
        None
    }
}

/// Shared handle to an initialized connector.
pub type SharedConnector = Arc<dyn DiscoveryConnector>;
