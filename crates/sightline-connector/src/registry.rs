//! Connector factory registry and plugin loading.
//!
//! Connectors are registered explicitly by name. Loading a plugin section
//! looks each entry up, validates and initializes the instances
//! concurrently, and sorts the outcome into loaded connectors and skipped
//! entries. One bad entry never prevents the others from loading.

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PluginSettings;
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{ConnectorContext, DiscoveryConnector, SharedConnector};
use crate::types::ConfigBlob;

/// Boxed connector as produced by a factory.
pub type BoxedConnector = Box<dyn DiscoveryConnector>;

/// Creates a fresh, uninitialized connector.
pub type ConnectorFactory = Arc<dyn Fn() -> BoxedConnector + Send + Sync>;

/// Registry key for a config name: lowercase, `-` folded to `_`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

/// An initialized connector with the config it was loaded from.
#[derive(Clone)]
pub struct LoadedConnector {
    pub name: String,
    pub config: ConfigBlob,
    pub handle: SharedConnector,
}

impl fmt::Debug for LoadedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedConnector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Why a plugin entry was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    MissingConfiguration,
    UnknownConnector,
    InvalidConfiguration(String),
    InitializationFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "disabled"),
            SkipReason::MissingConfiguration => write!(f, "no config block"),
            SkipReason::UnknownConnector => write!(f, "no connector registered under this name"),
            SkipReason::InvalidConfiguration(msg) => write!(f, "invalid config: {msg}"),
            SkipReason::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPlugin {
    pub name: String,
    pub reason: SkipReason,
}

/// Result of loading one plugin section.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub loaded: Vec<LoadedConnector>,
    pub skipped: Vec<SkippedPlugin>,
}

/// Name-to-factory map.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.names())
            .finish()
    }
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> BoxedConnector + Send + Sync + 'static,
    {
        let key = normalize_name(name);
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            warn!(connector = %key, "Replacing registered connector factory");
        }
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an uninitialized connector.
    pub fn create(&self, name: &str) -> ConnectorResult<BoxedConnector> {
        let key = normalize_name(name);
        let factory = self
            .factories
            .get(&key)
            .ok_or(ConnectorError::UnknownConnector { name: key })?;
        Ok(factory())
    }

    /// Load every entry of a plugin section.
    ///
    /// Disabled entries, entries without a config block, unknown names and
    /// connectors whose validation or initialization fails are skipped with
    /// a reason. The remaining instances are returned in section order.
    pub async fn load(
        &self,
        section: &BTreeMap<String, PluginSettings>,
        ctx: &ConnectorContext,
    ) -> LoadOutcome {
        let attempts = section
            .iter()
            .map(|(name, settings)| self.load_one(name, settings, ctx));
        let results = join_all(attempts).await;

        let mut outcome = LoadOutcome::default();
        for result in results {
            match result {
                Ok(loaded) => {
                    info!(connector = %loaded.name, "Connector loaded");
                    outcome.loaded.push(loaded);
                }
                Err(skipped) => {
                    if skipped.reason == SkipReason::Disabled {
                        info!(connector = %skipped.name, "Connector disabled, skipping");
                    } else {
                        warn!(
                            connector = %skipped.name,
                            reason = %skipped.reason,
                            "Skipping connector"
                        );
                    }
                    outcome.skipped.push(skipped);
                }
            }
        }
        outcome
    }

    async fn load_one(
        &self,
        name: &str,
        settings: &PluginSettings,
        ctx: &ConnectorContext,
    ) -> Result<LoadedConnector, SkippedPlugin> {
        let key = normalize_name(name);
        let skip = |reason| SkippedPlugin {
            name: key.clone(),
            reason,
        };

        if !settings.enabled {
            return Err(skip(SkipReason::Disabled));
        }
        let Some(config) = settings.config.clone() else {
            return Err(skip(SkipReason::MissingConfiguration));
        };
        let Ok(mut connector) = self.create(&key) else {
            return Err(skip(SkipReason::UnknownConnector));
        };

        connector
            .validate_config(&config)
            .map_err(|e| skip(SkipReason::InvalidConfiguration(e.to_string())))?;
        connector
            .initialize(&config, ctx)
            .await
            .map_err(|e| {
                if e.is_config_error() {
                    skip(SkipReason::InvalidConfiguration(e.to_string()))
                } else {
                    skip(SkipReason::InitializationFailed(e.to_string()))
                }
            })?;

        Ok(LoadedConnector {
            name: key.clone(),
            config,
            handle: Arc::from(connector),
        })
    }
}
