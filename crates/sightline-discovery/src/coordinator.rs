//! Run coordinator.
//!
//! One run: load both plugin sections through the registry, discover every
//! loaded connector concurrently, then hand the records to a publisher.

use futures::future::join_all;
use sightline_connector::prelude::*;
use sightline_events::Publisher;
use tracing::{error, info, instrument, warn};

use crate::config::{DiscoveryConfig, TopicMap};
use crate::report::{FailedConnector, RunReport};

pub struct RunCoordinator {
    registry: ConnectorRegistry,
    ctx: ConnectorContext,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(registry: ConnectorRegistry) -> Self {
        Self {
            registry,
            ctx: ConnectorContext::default(),
        }
    }

    /// Use a caller-supplied context (shared token cache, HTTP client).
    #[must_use]
    pub fn with_context(mut self, ctx: ConnectorContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run discovery and publish the result.
    ///
    /// Never fails: skipped connectors, failed scopes and rejected sends
    /// are counted in the report. `close` is called on the publisher on
    /// every path once `start` was attempted.
    #[instrument(skip_all)]
    pub async fn run(&self, config: &DiscoveryConfig, publisher: &mut dyn Publisher) -> RunReport {
        let mut report = RunReport::default();
        let records = self.discover(config, &mut report).await;

        info!(
            records = records.len(),
            failed_scopes = report.failed_scopes.len(),
            skipped = report.skipped_connectors.len(),
            "Discovery complete, publishing"
        );
        publish(&records, &config.publish.topics, publisher, &mut report).await;

        info!(
            published = report.published,
            publish_failures = report.publish_failures,
            "Run complete"
        );
        report
    }

    async fn discover(&self, config: &DiscoveryConfig, report: &mut RunReport) -> Vec<NormalizedRecord> {
        let mut loaded = Vec::new();
        report.skipped_connectors.extend(config.rejected.iter().cloned());
        for (section, plugins) in config.sections() {
            let outcome = self.registry.load(plugins, &self.ctx).await;
            info!(
                section,
                loaded = outcome.loaded.len(),
                skipped = outcome.skipped.len(),
                "Plugin section loaded"
            );
            loaded.extend(outcome.loaded);
            report.skipped_connectors.extend(outcome.skipped);
        }

        let scheduler = ScopeScheduler::new(config.scheduler.max_concurrent_scopes);
        let runs = join_all(loaded.iter().map(|connector| {
            let scheduler = &scheduler;
            async move {
                let result = scheduler
                    .discover(connector.handle.clone(), &connector.config)
                    .await;
                (connector.name.clone(), result)
            }
        }))
        .await;

        let mut records = Vec::new();
        for (name, result) in runs {
            match result {
                Ok(run) => {
                    report.record_connector_run(&run);
                    records.extend(run.records);
                }
                Err(e) => {
                    error!(connector = %name, error = %e, "Connector run failed");
                    report.failed_connectors.push(FailedConnector {
                        name,
                        message: e.to_string(),
                    });
                }
            }
        }
        records
    }
}

async fn publish(
    records: &[NormalizedRecord],
    topics: &TopicMap,
    publisher: &mut dyn Publisher,
    report: &mut RunReport,
) {
    if let Err(e) = publisher.start().await {
        error!(error = %e, "Publisher failed to start");
        report.publisher_error = Some(format!("start: {e}"));
        report.publish_failures = records.len();
        close(publisher, report).await;
        return;
    }

    for record in records {
        let topic = topics.topic_for(record.category());
        let value = match record.to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(topic, unique_id = %record.unique_id, error = %e, "Record not serializable");
                report.publish_failures += 1;
                continue;
            }
        };
        match publisher.send(topic, Some(record.unique_id.as_str()), &value).await {
            Ok(_) => report.published += 1,
            Err(e) => {
                warn!(topic, unique_id = %record.unique_id, error = %e, "Publish failed");
                report.publish_failures += 1;
            }
        }
    }

    if let Err(e) = publisher.flush().await {
        error!(error = %e, "Publisher flush failed");
        report.publisher_error = Some(format!("flush: {e}"));
    }
    close(publisher, report).await;
}

async fn close(publisher: &mut dyn Publisher, report: &mut RunReport) {
    if let Err(e) = publisher.close().await {
        warn!(error = %e, "Publisher close failed");
        if report.publisher_error.is_none() {
            report.publisher_error = Some(format!("close: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use sightline_connector::registry::SkipReason;
    use sightline_events::{Delivery, EventError, MemoryPublisher};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Returns users named by the scope's `users` list; fails scopes named
    /// `broken`.
    struct FakeDirectory;

    #[async_trait]
    impl DiscoveryConnector for FakeDirectory {
        fn name(&self) -> &str {
            "fake"
        }

        fn validate_config(&self, _config: &ConfigBlob) -> ConnectorResult<()> {
            Ok(())
        }

        async fn initialize(&mut self, _config: &ConfigBlob, _ctx: &ConnectorContext) -> ConnectorResult<()> {
            Ok(())
        }

        async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
            if scope.label == "broken" {
                return Err(ConnectorError::network("directory unreachable"));
            }
            let users = scope
                .config
                .get("users")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(users
                .into_iter()
                .map(|id| {
                    RawRecord::from_value(ObjectType::User, json!({"id": id}))
                        .unwrap()
                        .with_id_from(&["id"])
                })
                .collect())
        }

        async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
            let shares = scope
                .config
                .get("shares")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(shares
                .into_iter()
                .map(|id| {
                    RawRecord::from_value(ObjectType::Resource, json!({"path": id}))
                        .unwrap()
                        .with_id_from(&["path"])
                })
                .collect())
        }

        fn scope_tag(&self) -> Option<&'static str> {
            Some("tenant")
        }
    }

    fn coordinator() -> RunCoordinator {
        let mut registry = ConnectorRegistry::new();
        registry.register("fake", || Box::new(FakeDirectory));
        RunCoordinator::new(registry)
    }

    fn config(yaml: &str) -> DiscoveryConfig {
        DiscoveryConfig::from_yaml(yaml, "test").unwrap()
    }

    fn published_ids(publisher: &MemoryPublisher, topic: &str) -> Vec<String> {
        let mut ids: Vec<String> = publisher
            .records_for(topic)
            .into_iter()
            .filter_map(|r| r.key)
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_overlapping_scopes_publish_each_record_once() {
        let config = config(
            r#"
connectors:
  fake:
    config:
      tenants:
        - name: east
          users: [A, B]
        - name: west
          users: [B, C]
"#,
        );
        let mut publisher = MemoryPublisher::new();
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(published_ids(&publisher, "discovery-identity"), vec!["A", "B", "C"]);
        assert_eq!(report.published, 3);
        assert_eq!(report.records_by_connector["fake"], 3);
        assert!(report.is_clean());
        assert!(publisher.is_closed());
        assert_eq!(publisher.flush_count(), 1);

        for record in publisher.records() {
            assert_eq!(record.record["Source"], "fake");
            assert_eq!(record.record["ObjectType"], "user");
            assert!(record.record["tenant"] == "east" || record.record["tenant"] == "west");
        }
    }

    #[tokio::test]
    async fn test_records_routed_by_category() {
        let config = config(
            r#"
saas:
  fake:
    config:
      users: [alice]
      shares: [fs1/finance]
publish:
  topics:
    resource: inventory
"#,
        );
        let mut publisher = MemoryPublisher::new();
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(report.published, 2);
        assert_eq!(published_ids(&publisher, "discovery-identity"), vec!["alice"]);
        assert_eq!(published_ids(&publisher, "inventory"), vec!["fs1/finance"]);
    }

    #[tokio::test]
    async fn test_failed_scope_does_not_drop_siblings() {
        let config = config(
            r#"
connectors:
  fake:
    config:
      tenants:
        - name: east
          users: [A]
        - name: broken
        - name: west
          users: [C]
"#,
        );
        let mut publisher = MemoryPublisher::new();
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(published_ids(&publisher, "discovery-identity"), vec!["A", "C"]);
        assert_eq!(report.failed_scopes.len(), 1);
        assert_eq!(report.failed_scopes[0].scope, "broken");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_connectors_are_skipped() {
        let config = config(
            r#"
connectors:
  fake:
    config:
      users: [A]
  mainframe:
    config: {}
saas:
  workday:
    enabled: false
"#,
        );
        let mut publisher = MemoryPublisher::new();
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(report.published, 1);
        let mut skipped: Vec<_> = report
            .skipped_connectors
            .iter()
            .map(|s| (s.name.as_str(), s.reason.clone()))
            .collect();
        skipped.sort_by_key(|(name, _)| *name);
        assert_eq!(
            skipped,
            vec![
                ("mainframe", SkipReason::UnknownConnector),
                ("workday", SkipReason::Disabled),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped_and_the_rest_runs() {
        let config = config(
            r#"
connectors:
  fake:
    config:
      users: [A, B]
saas:
  fake:
    config:
      users: [Z]
  ghost:
    config: [1, 2]
"#,
        );
        let mut publisher = MemoryPublisher::new();
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(published_ids(&publisher, "discovery-identity"), vec!["A", "B"]);
        let mut skipped: Vec<_> = report
            .skipped_connectors
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        skipped.sort_unstable();
        assert_eq!(skipped, vec!["fake", "ghost"]);
        assert!(report
            .skipped_connectors
            .iter()
            .all(|s| matches!(s.reason, SkipReason::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_rejected_sends_are_counted() {
        let config = config(
            r#"
connectors:
  fake:
    config:
      users: [A, B]
      shares: [S]
"#,
        );
        let mut publisher = MemoryPublisher::new().failing_on("discovery-identity");
        let report = coordinator().run(&config, &mut publisher).await;

        assert_eq!(report.published, 1);
        assert_eq!(report.publish_failures, 2);
        assert!(publisher.is_closed());
    }

    #[derive(Default)]
    struct RefusingPublisher {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Publisher for RefusingPublisher {
        async fn start(&mut self) -> Result<(), EventError> {
            Err(EventError::ConnectionFailed {
                broker: "kafka:9092".to_string(),
                cause: "connection refused".to_string(),
            })
        }

        async fn send(&self, _topic: &str, _key: Option<&str>, _record: &Value) -> Result<Delivery, EventError> {
            Err(EventError::NotStarted)
        }

        async fn flush(&self) -> Result<(), EventError> {
            Err(EventError::NotStarted)
        }

        async fn close(&mut self) -> Result<(), EventError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_called_after_failed_start() {
        let config = config("connectors:\n  fake:\n    config:\n      users: [A]\n");
        let mut publisher = RefusingPublisher::default();
        let report = coordinator().run(&config, &mut publisher).await;

        assert!(publisher.closed.load(Ordering::SeqCst));
        assert_eq!(report.published, 0);
        assert_eq!(report.publish_failures, 1);
        assert!(report.publisher_error.unwrap().starts_with("start"));
    }
}
