//! SDK output to record conversion.
//!
//! Field names follow the AWS API shapes so records look the same as the
//! vendor's own JSON.

use aws_sdk_iam::primitives::{DateTime, DateTimeFormat};
use aws_sdk_iam::types::{Role, User};
use aws_sdk_resourcegroupstagging::types::ResourceTagMapping;
use serde_json::{json, Map, Value};
use sightline_connector::prelude::*;

fn timestamp(value: &DateTime) -> Value {
    value
        .fmt(DateTimeFormat::DateTime)
        .map_or(Value::Null, Value::String)
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value);
    }
}

/// IAM user, identified by `UserId`.
pub fn user_record(user: &User) -> RawRecord {
    let mut fields = Map::new();
    fields.insert("UserName".into(), json!(user.user_name()));
    fields.insert("UserId".into(), json!(user.user_id()));
    fields.insert("Arn".into(), json!(user.arn()));
    fields.insert("Path".into(), json!(user.path()));
    fields.insert("CreateDate".into(), timestamp(user.create_date()));
    insert_opt(&mut fields, "PasswordLastUsed", user.password_last_used().map(timestamp));

    RawRecord::new(ObjectType::User, fields).with_id_from(&["UserId", "Arn"])
}

/// IAM role, identified by `RoleId`. The trust policy is URL-decoded.
pub fn role_record(role: &Role) -> RawRecord {
    let mut fields = Map::new();
    fields.insert("RoleName".into(), json!(role.role_name()));
    fields.insert("RoleId".into(), json!(role.role_id()));
    fields.insert("Arn".into(), json!(role.arn()));
    fields.insert("Path".into(), json!(role.path()));
    fields.insert("CreateDate".into(), timestamp(role.create_date()));
    insert_opt(&mut fields, "Description", role.description().map(|d| json!(d)));
    insert_opt(
        &mut fields,
        "MaxSessionDuration",
        role.max_session_duration().map(|d| json!(d)),
    );
    insert_opt(
        &mut fields,
        "AssumeRolePolicyDocument",
        role.assume_role_policy_document().map(decode_policy),
    );

    RawRecord::new(ObjectType::Role, fields).with_id_from(&["RoleId", "Arn"])
}

/// IAM returns policy documents URL-encoded; parse them when possible.
fn decode_policy(raw: &str) -> Value {
    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned());
    serde_json::from_str(&decoded).unwrap_or(Value::String(decoded))
}

/// Tagged resource, identified by ARN.
pub fn resource_record(mapping: &ResourceTagMapping) -> Option<RawRecord> {
    let arn = mapping.resource_arn().filter(|a| !a.is_empty())?;
    let parts = ArnParts::parse(arn);

    let tags: Vec<Value> = mapping
        .tags()
        .iter()
        .map(|tag| json!({"Key": tag.key(), "Value": tag.value()}))
        .collect();
    let name = mapping
        .tags()
        .iter()
        .find(|tag| tag.key().eq_ignore_ascii_case("name"))
        .map_or(arn, |tag| tag.value());

    let mut fields = Map::new();
    fields.insert("ResourceARN".into(), json!(arn));
    fields.insert("ResourceName".into(), json!(name));
    fields.insert("Service".into(), json!(parts.service));
    fields.insert("ResourceType".into(), json!(parts.resource_type));
    insert_opt(&mut fields, "AccountId", parts.account.map(|a| json!(a)));
    fields.insert("Tags".into(), Value::Array(tags));

    Some(RawRecord::new(ObjectType::Resource, fields).with_unique_id(arn))
}

/// `arn:partition:service:region:account:resource-type/resource-id`
#[derive(Debug, PartialEq, Eq)]
pub struct ArnParts<'a> {
    pub service: &'a str,
    pub account: Option<&'a str>,
    pub resource_type: &'a str,
}

impl<'a> ArnParts<'a> {
    #[must_use]
    pub fn parse(arn: &'a str) -> Self {
        let mut parts = arn.splitn(6, ':');
        let _prefix = parts.next();
        let _partition = parts.next();
        let service = parts.next().unwrap_or("unknown");
        let _region = parts.next();
        let account = parts.next().filter(|a| !a.is_empty());
        let resource_type = match parts.next() {
            Some(resource) => match resource.split_once(['/', ':']) {
                Some((kind, _)) => kind,
                None => resource,
            },
            None => "unknown",
        };
        Self {
            service,
            account,
            resource_type,
        }
    }
}
