//! Per-run deduplication and normalization.
//!
//! A [`Normalizer`] is created for each connector at the start of a
//! `discover` call and shared by every scope task of that call. Records are
//! deduplicated on their UniqueID across all scopes; the first one seen is
//! kept and later ones are dropped without merging.

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{trace, warn};

use crate::types::{NormalizedRecord, RawRecord};

/// Set of identifiers already emitted in this run.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<String>>,
}

impl DedupSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id`; returns `false` if it was already present.
    ///
    /// The check and the insert happen under one lock acquisition.
    pub fn insert(&self, id: &str) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.contains(id) {
            return false;
        }
        seen.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tags vendor records with `ObjectType`/`Source` and drops duplicates.
#[derive(Debug)]
pub struct Normalizer {
    source: String,
    scope_tag_key: Option<&'static str>,
    dedup: DedupSet,
}

impl Normalizer {
    pub fn new(source: impl Into<String>, scope_tag_key: Option<&'static str>) -> Self {
        Self {
            source: source.into(),
            scope_tag_key,
            dedup: DedupSet::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of distinct identifiers emitted so far.
    pub fn emitted(&self) -> usize {
        self.dedup.len()
    }

    /// Normalize one record, or `None` if its identifier was already emitted.
    pub fn normalize(&self, record: RawRecord, scope_label: &str) -> Option<NormalizedRecord> {
        let unique_id = match record.unique_id {
            Some(id) => id,
            None => match fingerprint(&record) {
                Some(key) => key,
                None => {
                    warn!(
                        source = %self.source,
                        object_type = %record.object_type,
                        "Dropping record that has no identifier and cannot be fingerprinted"
                    );
                    return None;
                }
            },
        };

        if !self.dedup.insert(&unique_id) {
            trace!(source = %self.source, unique_id = %unique_id, "Duplicate record dropped");
            return None;
        }

        let scope_tag = self
            .scope_tag_key
            .map(|key| (key.to_string(), scope_label.to_string()));

        Some(NormalizedRecord {
            object_type: record.object_type,
            source: self.source.clone(),
            unique_id,
            scope_tag,
            fields: record.fields,
        })
    }

    /// Normalize a batch, preserving the batch order of the survivors.
    pub fn normalize_all(&self, records: Vec<RawRecord>, scope_label: &str) -> Vec<NormalizedRecord> {
        records
            .into_iter()
            .filter_map(|record| self.normalize(record, scope_label))
            .collect()
    }
}

/// Content key for records with no vendor identifier.
///
/// `serde_json::Map` keeps keys sorted, so equal records always render to
/// the same string.
fn fingerprint(record: &RawRecord) -> Option<String> {
    serde_json::to_string(&record.fields)
        .ok()
        .map(|body| format!("{}:{body}", record.object_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectType;
    use serde_json::json;
    use std::sync::Arc;

    fn user(id: &str) -> RawRecord {
        RawRecord::from_value(ObjectType::User, json!({"id": id, "name": format!("user {id}")}))
            .unwrap()
            .with_id_from(&["id"])
    }

    #[test]
    fn test_dedup_set_insert() {
        let set = DedupSet::new();
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.insert("b"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_emitted_count_equals_distinct_ids() {
        let normalizer = Normalizer::new("entra", None);
        let pages = vec![
            vec![user("A"), user("B"), user("A")],
            vec![user("B"), user("C")],
            vec![user("C"), user("C"), user("D")],
        ];

        let emitted: Vec<_> = pages
            .into_iter()
            .flat_map(|page| normalizer.normalize_all(page, "default"))
            .collect();

        let ids: Vec<_> = emitted.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(normalizer.emitted(), 4);
    }

    #[test]
    fn test_first_seen_wins_without_merge() {
        let normalizer = Normalizer::new("github", None);
        let first = RawRecord::from_value(ObjectType::User, json!({"id": 1, "login": "octo"}))
            .unwrap()
            .with_id_from(&["id"]);
        let second =
            RawRecord::from_value(ObjectType::User, json!({"id": 1, "login": "renamed", "extra": true}))
                .unwrap()
                .with_id_from(&["id"]);

        let kept = normalizer.normalize(first, "acme").unwrap();
        assert!(normalizer.normalize(second, "acme").is_none());
        assert_eq!(kept.fields["login"], "octo");
        assert!(!kept.fields.contains_key("extra"));
    }

    #[test]
    fn test_tags_and_scope_label() {
        let normalizer = Normalizer::new("aws", Some("region"));
        let record = normalizer.normalize(user("AIDA1"), "eu-west-1").unwrap();

        assert_eq!(record.source, "aws");
        assert_eq!(record.object_type, ObjectType::User);
        assert_eq!(
            record.scope_tag,
            Some(("region".to_string(), "eu-west-1".to_string()))
        );
        let value = record.to_value().unwrap();
        assert_eq!(value["Source"], "aws");
        assert_eq!(value["ObjectType"], "user");
        assert_eq!(value["name"], "user AIDA1");
    }

    #[test]
    fn test_records_without_id_fall_back_to_content() {
        let normalizer = Normalizer::new("ldap", None);
        let make = |cn: &str| {
            RawRecord::from_value(ObjectType::Resource, json!({"cn": cn})).unwrap()
        };

        assert!(normalizer.normalize(make("printer-1"), "corp").is_some());
        assert!(normalizer.normalize(make("printer-1"), "corp").is_none());
        assert!(normalizer.normalize(make("printer-2"), "corp").is_some());
    }

    #[test]
    fn test_concurrent_inserts_keep_single_copy() {
        let normalizer = Arc::new(Normalizer::new("entra", None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let normalizer = normalizer.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter_map(|i| normalizer.normalize(user(&format!("u{i}")), "t"))
                        .count()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
