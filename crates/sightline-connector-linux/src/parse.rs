//! Parsers for the account databases and share configuration read off a
//! host.

use serde_json::{json, Map, Value};
use sightline_connector::prelude::*;
use std::collections::BTreeSet;

use crate::config::ResourceKind;

/// One `/etc/passwd` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub comment: String,
    pub home: String,
    pub shell: String,
}

/// One `/etc/group` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: Option<u32>,
    pub members: Vec<String>,
}

/// A share or printer found on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedResource {
    pub name: String,
    pub description: String,
}

fn content_lines<'a>(data: &'a str, comment_prefixes: &'a [char]) -> impl Iterator<Item = &'a str> {
    data.lines()
        .map(str::trim)
        .filter(move |line| !line.is_empty() && !line.starts_with(comment_prefixes))
}

/// `name:password:uid:gid:gecos:home:shell`. Short lines are skipped.
pub fn parse_passwd(data: &str) -> Vec<PasswdEntry> {
    content_lines(data, &['#'])
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                username: parts[0].to_string(),
                uid: parts[2].parse().ok(),
                gid: parts[3].parse().ok(),
                comment: parts[4].to_string(),
                home: parts[5].to_string(),
                shell: parts[6].to_string(),
            })
        })
        .collect()
}

/// `name:password:gid:member,member`. Short lines are skipped.
pub fn parse_group(data: &str) -> Vec<GroupEntry> {
    content_lines(data, &['#'])
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 4 {
                return None;
            }
            Some(GroupEntry {
                name: parts[0].to_string(),
                gid: parts[2].parse().ok(),
                members: parts[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Join accounts with their groups.
///
/// A user belongs to a group when listed as a member or when the group is
/// its primary group. Membership in any of `privilege_groups` sets
/// `is_admin`. Records are identified by `host:username`.
pub fn user_records(
    host: &str,
    users: Vec<PasswdEntry>,
    groups: &[GroupEntry],
    privilege_groups: &[String],
) -> Vec<RawRecord> {
    users
        .into_iter()
        .map(|user| {
            let memberships: BTreeSet<&str> = groups
                .iter()
                .filter(|g| {
                    g.members.iter().any(|m| *m == user.username)
                        || (user.gid.is_some() && g.gid == user.gid)
                })
                .map(|g| g.name.as_str())
                .collect();
            let is_admin = memberships
                .iter()
                .any(|g| privilege_groups.iter().any(|p| p == g));

            let mut fields = Map::new();
            fields.insert("username".to_string(), json!(user.username));
            fields.insert("uid".to_string(), json!(user.uid));
            fields.insert("gid".to_string(), json!(user.gid));
            fields.insert("comment".to_string(), json!(user.comment));
            fields.insert("home".to_string(), json!(user.home));
            fields.insert("shell".to_string(), json!(user.shell));
            fields.insert("groups".to_string(), json!(memberships));
            fields.insert("is_admin".to_string(), Value::Bool(is_admin));

            RawRecord::new(ObjectType::User, fields).with_unique_id(format!("{host}:{}", user.username))
        })
        .collect()
}

/// Parse one resource command's output.
pub fn parse_resources(kind: ResourceKind, output: &str) -> Vec<SharedResource> {
    match kind {
        ResourceKind::Nfs => parse_exports(output),
        ResourceKind::Smb => parse_smb_conf(output),
        ResourceKind::Printers => parse_printers(output),
    }
}

/// Each export line is `/path client(options)...`.
fn parse_exports(data: &str) -> Vec<SharedResource> {
    content_lines(data, &['#'])
        .filter_map(|line| {
            let path = line.split_whitespace().next()?;
            Some(SharedResource {
                name: path.to_string(),
                description: line.to_string(),
            })
        })
        .collect()
}

/// Share sections with their `path` and `comment`. `[global]` holds server
/// settings, not a share.
fn parse_smb_conf(data: &str) -> Vec<SharedResource> {
    let mut shares: Vec<SharedResource> = Vec::new();
    let mut in_share = false;

    for line in content_lines(data, &['#', ';']) {
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let section = section.trim();
            in_share = !section.eq_ignore_ascii_case("global");
            if in_share {
                shares.push(SharedResource {
                    name: section.to_string(),
                    description: String::new(),
                });
            }
            continue;
        }
        let (Some(share), true) = (shares.last_mut(), in_share) else {
            continue;
        };
        if let Some((key, value)) = line.split_once('=') {
            let label = match key.trim().to_ascii_lowercase().as_str() {
                "path" => "Path",
                "comment" => "Comment",
                _ => continue,
            };
            if !share.description.is_empty() {
                share.description.push_str("; ");
            }
            share.description.push_str(&format!("{label}: {}", value.trim()));
        }
    }
    shares
}

/// `printer NAME is idle.  enabled since ...`
fn parse_printers(data: &str) -> Vec<SharedResource> {
    content_lines(data, &[])
        .filter(|line| line.to_ascii_lowercase().starts_with("printer "))
        .filter_map(|line| {
            let name = line.split_whitespace().nth(1)?;
            Some(SharedResource {
                name: name.to_string(),
                description: line.to_string(),
            })
        })
        .collect()
}

/// Resource records identified by `host:kind:name`.
pub fn resource_records(host: &str, kind: ResourceKind, resources: Vec<SharedResource>) -> Vec<RawRecord> {
    resources
        .into_iter()
        .map(|resource| {
            let mut fields = Map::new();
            fields.insert("ResourceID".to_string(), json!(resource.name));
            fields.insert("ResourceName".to_string(), json!(resource.name));
            fields.insert("ResourceType".to_string(), json!(kind.as_str()));
            fields.insert("Description".to_string(), json!(resource.description));
            RawRecord::new(ObjectType::Resource, fields)
                .with_unique_id(format!("{host}:{kind}:{}", resource.name))
        })
        .collect()
}
