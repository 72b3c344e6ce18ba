//! Service configuration file.
//!
//! ```yaml
//! connectors:
//!   ad:
//!     enabled: true
//!     config:
//!       domains:
//!         - server: ldaps://dc1.corp.example.com
//!           base_dn: DC=corp,DC=example,DC=com
//! saas:
//!   github:
//!     config:
//!       organization: acme
//!       github_token: ghp_xxx
//! publish:
//!   topics:
//!     identity: discovery-identity
//! scheduler:
//!   max_concurrent_scopes: 10
//! ```

use serde::Deserialize;
use serde_json::Value;
use sightline_connector::config::LAST_RUN_KEY;
use sightline_connector::prelude::*;
use sightline_connector::registry::{normalize_name, SkipReason, SkippedPlugin};
use sightline_connector::scheduler::DEFAULT_MAX_CONCURRENT_SCOPES;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::DiscoveryError;

/// Connector name to plugin entry.
pub type PluginSection = BTreeMap<String, PluginSettings>;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Directory and cloud connectors.
    pub connectors: PluginSection,

    /// SaaS plugins.
    pub saas: PluginSection,

    pub publish: PublishConfig,

    pub scheduler: SchedulerConfig,

    /// Plugin entries dropped while parsing: malformed entries and names
    /// already configured in an earlier section.
    pub rejected: Vec<SkippedPlugin>,
}

/// File layout before plugin entries are checked one by one.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    connectors: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    saas: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    publish: PublishConfig,
    #[serde(default)]
    scheduler: SchedulerConfig,
}

impl DiscoveryConfig {
    /// Read and parse a YAML config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DiscoveryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw, &path.display().to_string())
    }

    /// Parse YAML text; `origin` names the source in error messages.
    pub fn from_yaml(raw: &str, origin: &str) -> Result<Self, DiscoveryError> {
        // An empty document is an empty config, not an error.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawConfig = serde_yaml::from_str(raw).map_err(|source| DiscoveryError::ConfigParse {
            origin: origin.to_string(),
            source,
        })?;
        if raw.scheduler.max_concurrent_scopes == 0 {
            return Err(DiscoveryError::ConfigInvalid {
                message: "scheduler.max_concurrent_scopes must be positive".to_string(),
            });
        }

        let mut rejected = Vec::new();
        let connectors = parse_section("connectors", raw.connectors, &PluginSection::new(), &mut rejected);
        let saas = parse_section("saas", raw.saas, &connectors, &mut rejected);

        Ok(Self {
            connectors,
            saas,
            publish: raw.publish,
            scheduler: raw.scheduler,
            rejected,
        })
    }

    /// Inject `last_run` into every connector config that lacks one.
    ///
    /// A config that already carries a watermark keeps its own. Scope items
    /// inherit the parent value through scope expansion.
    pub fn apply_last_run(&mut self, last_run: &str) {
        let sections = self.connectors.values_mut().chain(self.saas.values_mut());
        for config in sections.filter_map(|entry| entry.config.as_mut()) {
            config
                .entry(LAST_RUN_KEY.to_string())
                .or_insert_with(|| Value::String(last_run.to_string()));
        }
    }

    /// Both plugin sections, `connectors` first.
    pub fn sections(&self) -> [(&'static str, &PluginSection); 2] {
        [("connectors", &self.connectors), ("saas", &self.saas)]
    }
}

/// Convert a section entry by entry. A malformed entry, or a name already
/// present in `earlier`, is rejected with a reason and the rest is kept.
fn parse_section(
    section: &str,
    entries: BTreeMap<String, serde_yaml::Value>,
    earlier: &PluginSection,
    rejected: &mut Vec<SkippedPlugin>,
) -> PluginSection {
    let mut plugins = PluginSection::new();
    for (name, value) in entries {
        let clash = earlier
            .keys()
            .chain(plugins.keys())
            .any(|other| normalize_name(other) == normalize_name(&name));
        let parsed = if clash {
            Err(format!("'{name}' is configured more than once"))
        } else if value.is_null() {
            Ok(PluginSettings::default())
        } else {
            serde_yaml::from_value::<PluginSettings>(value)
                .map_err(|e| format!("{section}.{name}: {e}"))
        };

        match parsed {
            Ok(settings) => {
                plugins.insert(name, settings);
            }
            Err(message) => {
                warn!(section, connector = %name, reason = %message, "Rejecting plugin entry");
                rejected.push(SkippedPlugin {
                    name: normalize_name(&name),
                    reason: SkipReason::InvalidConfiguration(message),
                });
            }
        }
    }
    plugins
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub topics: TopicMap,

    /// Capture records in memory instead of sending them to the broker.
    #[serde(default)]
    pub dry_run: bool,
}

/// Topic per record category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicMap {
    #[serde(default = "default_identity_topic")]
    pub identity: String,
    #[serde(default = "default_resource_topic")]
    pub resource: String,
    #[serde(default = "default_privilege_topic")]
    pub privilege: String,
}

fn default_identity_topic() -> String {
    "discovery-identity".to_string()
}

fn default_resource_topic() -> String {
    "discovery-resource".to_string()
}

fn default_privilege_topic() -> String {
    "discovery-privilege".to_string()
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            identity: default_identity_topic(),
            resource: default_resource_topic(),
            privilege: default_privilege_topic(),
        }
    }
}

impl TopicMap {
    #[must_use]
    pub fn topic_for(&self, category: RecordCategory) -> &str {
        match category {
            RecordCategory::Identity => &self.identity,
            RecordCategory::Resource => &self.resource,
            RecordCategory::Privilege => &self.privilege,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_scopes")]
    pub max_concurrent_scopes: usize,
}

fn default_max_concurrent_scopes() -> usize {
    DEFAULT_MAX_CONCURRENT_SCOPES
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scopes: default_max_concurrent_scopes(),
        }
    }
}
