//! Connector configuration: plugin entries, scope expansion and watermarks.
//!
//! The framework never sees a configuration file. It receives a mapping of
//! connector name to [`PluginSettings`] and treats each `config` block as an
//! opaque [`ConfigBlob`] until a connector parses it into typed settings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::ConfigBlob;

/// Config key holding the incremental watermark.
pub const LAST_RUN_KEY: &str = "last_run";

/// List-valued keys that fan a connector out into scopes, with the key a
/// string item is stored under in its scope config.
pub const SCOPE_LIST_KEYS: [(&str, &str); 6] = [
    ("domains", "domain"),
    ("regions", "region"),
    ("tenants", "tenant"),
    ("projects", "project"),
    ("subscriptions", "subscription"),
    ("hosts", "host"),
];

const LABEL_KEYS: [&str; 9] = [
    "name",
    "tenant_id",
    "server",
    "host",
    "domain",
    "region",
    "project",
    "subscription",
    "instance_url",
];

/// One entry of a plugin section: `{enabled, config}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<ConfigBlob>,
}

fn default_enabled() -> bool {
    true
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            config: None,
        }
    }
}

impl PluginSettings {
    /// Enabled entry with the given config block.
    #[must_use]
    pub fn enabled(config: ConfigBlob) -> Self {
        Self {
            enabled: true,
            config: Some(config),
        }
    }
}

/// Parse an opaque config block into a connector's typed settings.
pub fn parse_settings<T: DeserializeOwned>(config: &ConfigBlob) -> ConnectorResult<T> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| ConnectorError::invalid_config(e.to_string()))
}

/// One independently fetchable unit of a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub index: usize,
    pub label: String,
    pub config: ConfigBlob,
}

impl Scope {
    /// Scope covering the whole config.
    #[must_use]
    pub fn single(config: ConfigBlob) -> Self {
        let label = label_for(&config).unwrap_or_else(|| "default".to_string());
        Self {
            index: 0,
            label,
            config,
        }
    }

    /// The caller-supplied watermark, if any.
    ///
    /// Null and empty strings count as absent so that no connector ever
    /// filters on a default value.
    #[must_use]
    pub fn watermark(&self) -> Option<Watermark> {
        match self.config.get(LAST_RUN_KEY)? {
            Value::String(s) if !s.trim().is_empty() => Some(Watermark::new(s.trim())),
            Value::Number(n) => Some(Watermark::new(n.to_string())),
            _ => None,
        }
    }

    /// Parse this scope's config into typed settings.
    pub fn settings<T: DeserializeOwned>(&self) -> ConnectorResult<T> {
        parse_settings(&self.config)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Expand a connector config into its scopes.
///
/// The first list key present (in [`SCOPE_LIST_KEYS`] order) is expanded.
/// Object items are overlaid on the parent config; string items are stored
/// under the singular key. A missing or empty list yields the config itself
/// as the only scope.
pub fn expand_scopes(config: &ConfigBlob) -> ConnectorResult<Vec<Scope>> {
    let present: Vec<&str> = SCOPE_LIST_KEYS
        .iter()
        .map(|(plural, _)| *plural)
        .filter(|k| config.contains_key(*k))
        .collect();

    let Some(&(list_key, singular)) = SCOPE_LIST_KEYS
        .iter()
        .find(|(plural, _)| present.contains(plural))
    else {
        return Ok(vec![Scope::single(config.clone())]);
    };

    if present.len() > 1 {
        warn!(
            expanded = list_key,
            ignored = ?&present[1..],
            "Multiple scope lists configured, expanding only the first"
        );
    }

    let items = match config.get(list_key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) => return Ok(vec![Scope::single(config.clone())]),
        Some(_) => {
            return Err(ConnectorError::invalid_config(format!(
                "'{list_key}' must be a list"
            )))
        }
        None => return Ok(vec![Scope::single(config.clone())]),
    };

    if items.is_empty() {
        return Ok(vec![Scope::single(config.clone())]);
    }

    let mut parent = config.clone();
    parent.remove(list_key);

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut scope_config = parent.clone();
            let label = match item {
                Value::Object(overrides) => {
                    for (k, v) in overrides {
                        scope_config.insert(k.clone(), v.clone());
                    }
                    label_for(overrides).unwrap_or_else(|| format!("{singular}-{index}"))
                }
                Value::String(value) => {
                    scope_config.insert(singular.to_string(), Value::String(value.clone()));
                    value.clone()
                }
                _ => {
                    return Err(ConnectorError::invalid_config(format!(
                        "'{list_key}[{index}]' must be an object or a string"
                    )))
                }
            };
            Ok(Scope {
                index,
                label,
                config: scope_config,
            })
        })
        .collect()
}

fn label_for(config: &ConfigBlob) -> Option<String> {
    LABEL_KEYS
        .iter()
        .find_map(|k| config.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Caller-supplied "modified since" cutoff.
///
/// The raw value is kept verbatim. When it parses as a timestamp the
/// vendor-specific renderings reformat it; otherwise they forward the raw
/// string unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    raw: String,
    parsed: Option<DateTime<Utc>>,
}

impl Watermark {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = parse_timestamp(&raw);
        Self { raw, parsed }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.parsed
    }

    /// `2023-01-01T00:00:00Z`, as used by OData and SOQL.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.render("%Y-%m-%dT%H:%M:%SZ")
    }

    /// `20230101000000Z`, as used by LDAP `whenChanged` comparisons.
    #[must_use]
    pub fn to_generalized_time(&self) -> String {
        self.render("%Y%m%d%H%M%SZ")
    }

    /// `2023-01-01 00:00:00`, as used by ServiceNow encoded queries.
    #[must_use]
    pub fn to_servicenow(&self) -> String {
        self.render("%Y-%m-%d %H:%M:%S")
    }

    fn render(&self, format: &str) -> String {
        match self.parsed {
            Some(ts) => ts.format(format).to_string(),
            None => self.raw.clone(),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let trimmed = raw.trim_end_matches('Z');
    let trimmed = trimmed.split_once('.').map_or(trimmed, |(head, _)| head);
    for format in ["%Y%m%d%H%M%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
