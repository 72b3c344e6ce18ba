//! Search entry to record conversion.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ldap3::SearchEntry;
use serde_json::{Map, Value};
use sightline_connector::prelude::*;

/// Binary GUID attribute used as the primary identifier.
pub const GUID_ATTRIBUTE: &str = "objectGUID";

const ACCOUNT_NAME_ATTRIBUTE: &str = "sAMAccountName";

/// Convert an entry into a record.
///
/// Single-valued attributes become strings and multi-valued attributes
/// arrays. Binary values are base64 encoded. The DN is kept under `dn`.
///
/// Accounts are identified by `objectGUID`, falling back to
/// `sAMAccountName`; resources by DN.
pub fn to_record(object_type: ObjectType, entry: SearchEntry) -> RawRecord {
    let SearchEntry {
        dn,
        attrs,
        bin_attrs,
    } = entry;

    let mut fields = Map::new();
    fields.insert("dn".to_string(), Value::String(dn.clone()));

    for (name, values) in attrs {
        // A GUID whose bytes happen to be valid UTF-8 arrives as text.
        if name.eq_ignore_ascii_case(GUID_ATTRIBUTE) {
            let raw = values.into_iter().map(String::into_bytes).collect();
            fields.insert(name, encode_binary(raw));
            continue;
        }
        if let Some(value) = collapse(values.into_iter().map(Value::String).collect()) {
            fields.insert(name, value);
        }
    }
    for (name, values) in bin_attrs {
        fields.insert(name, encode_binary(values));
    }

    let record = RawRecord::new(object_type, fields);
    match object_type {
        ObjectType::Resource => record.with_unique_id(dn),
        _ => record.with_id_from(&[GUID_ATTRIBUTE, ACCOUNT_NAME_ATTRIBUTE]),
    }
}

fn encode_binary(values: Vec<Vec<u8>>) -> Value {
    collapse(
        values
            .iter()
            .map(|bytes| Value::String(STANDARD.encode(bytes)))
            .collect(),
    )
    .unwrap_or(Value::Null)
}

fn collapse(mut values: Vec<Value>) -> Option<Value> {
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}
