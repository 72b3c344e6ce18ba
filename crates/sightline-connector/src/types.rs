//! Record and classification types shared by every connector.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{ConnectorError, ConnectorResult};

/// Opaque per-connector configuration block.
pub type ConfigBlob = Map<String, Value>;

/// Envelope key carrying the object type.
pub const OBJECT_TYPE_KEY: &str = "ObjectType";

/// Envelope key carrying the connector name.
pub const SOURCE_KEY: &str = "Source";

/// Kind of object a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    User,
    Role,
    Computer,
    ServiceAccount,
    Resource,
    Privilege,
}

impl ObjectType {
    /// Wire name used in the published envelope.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Role => "role",
            ObjectType::Computer => "computer",
            ObjectType::ServiceAccount => "service_account",
            ObjectType::Resource => "resource",
            ObjectType::Privilege => "privilege",
        }
    }

    /// Topic category this object type is published under.
    #[must_use]
    pub fn category(&self) -> RecordCategory {
        match self {
            ObjectType::User
            | ObjectType::Role
            | ObjectType::Computer
            | ObjectType::ServiceAccount => RecordCategory::Identity,
            ObjectType::Resource => RecordCategory::Resource,
            ObjectType::Privilege => RecordCategory::Privilege,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishing category; each maps to one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Identity,
    Resource,
    Privilege,
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordCategory::Identity => f.write_str("identity"),
            RecordCategory::Resource => f.write_str("resource"),
            RecordCategory::Privilege => f.write_str("privilege"),
        }
    }
}

/// A vendor record as fetched, tagged with its object type.
///
/// Fields are the vendor's own representation and are never reshaped.
/// `unique_id` is whatever the connector extracted after applying its own
/// fallback chain; `None` lets the normalizer fall back to a content key.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub object_type: ObjectType,
    pub unique_id: Option<String>,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Create a record with no identifier.
    #[must_use]
    pub fn new(object_type: ObjectType, fields: Map<String, Value>) -> Self {
        Self {
            object_type,
            unique_id: None,
            fields,
        }
    }

    /// Create a record from a JSON value, which must be an object.
    pub fn from_value(object_type: ObjectType, value: Value) -> ConnectorResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(object_type, fields)),
            other => Err(ConnectorError::invalid_data(format!(
                "expected a JSON object for {object_type} record, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Set the identifier from the first of `keys` holding a non-empty value.
    #[must_use]
    pub fn with_id_from(mut self, keys: &[&str]) -> Self {
        self.unique_id = keys.iter().find_map(|k| scalar_string(self.fields.get(*k)));
        self
    }

    /// Set the identifier explicitly.
    #[must_use]
    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A record ready for publication.
///
/// Serializes as one flat JSON object: the vendor fields, the optional
/// scope tag, then `ObjectType` and `Source`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub object_type: ObjectType,
    pub source: String,
    pub unique_id: String,
    pub scope_tag: Option<(String, String)>,
    pub fields: Map<String, Value>,
}

impl NormalizedRecord {
    #[must_use]
    pub fn category(&self) -> RecordCategory {
        self.object_type.category()
    }

    /// Render the envelope as a JSON value.
    pub fn to_value(&self) -> ConnectorResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in &self.fields {
            if key == OBJECT_TYPE_KEY || key == SOURCE_KEY {
                continue;
            }
            map.serialize_entry(key, value)?;
        }
        if let Some((key, value)) = &self.scope_tag {
            if !self.fields.contains_key(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.serialize_entry(OBJECT_TYPE_KEY, &self.object_type)?;
        map.serialize_entry(SOURCE_KEY, &self.source)?;
        map.end()
    }
}

/// Render a string or number field as an identifier.
pub(crate) fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
