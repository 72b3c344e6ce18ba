//! Scope-parallel discovery for one connector.
//!
//! A connector's config is expanded into scopes, each scope is fetched on
//! its own task under a concurrency limit, and every batch goes through one
//! shared [`Normalizer`] as soon as it arrives. A failing scope is logged
//! and reported; it never aborts its siblings.

use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{expand_scopes, Scope};
use crate::error::{ConnectorError, ConnectorResult};
use crate::normalize::Normalizer;
use crate::traits::{ExecutionMode, SharedConnector};
use crate::types::{ConfigBlob, NormalizedRecord, RawRecord};

/// Scope concurrency when the config does not say otherwise.
pub const DEFAULT_MAX_CONCURRENT_SCOPES: usize = 10;

/// Config key overriding the scope concurrency limit.
pub const CONCURRENCY_KEY: &str = "max_concurrent_scopes";

/// Which fetch a report line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Identities,
    Resources,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Identities => write!(f, "identities"),
            FetchKind::Resources => write!(f, "resources"),
        }
    }
}

/// Result of one fetch of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeOutcome {
    /// Records returned by the vendor (before deduplication).
    Fetched(usize),
    /// Connector does not implement this fetch.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeReport {
    pub scope: String,
    pub kind: FetchKind,
    pub outcome: ScopeOutcome,
}

/// Everything one connector produced in one run.
#[derive(Debug, Clone)]
pub struct ConnectorRun {
    pub connector: String,
    pub records: Vec<NormalizedRecord>,
    pub scopes: Vec<ScopeReport>,
}

impl ConnectorRun {
    pub fn failed_scopes(&self) -> impl Iterator<Item = &ScopeReport> {
        self.scopes
            .iter()
            .filter(|r| matches!(r.outcome, ScopeOutcome::Failed(_)))
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_scopes().next().is_some()
    }
}

/// Fans a connector out over its scopes.
#[derive(Debug, Clone)]
pub struct ScopeScheduler {
    default_limit: usize,
}

impl Default for ScopeScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_SCOPES)
    }
}

struct ScopeResult {
    index: usize,
    label: String,
    identities: ScopeFetch,
    resources: ScopeFetch,
}

enum ScopeFetch {
    Records(Vec<NormalizedRecord>, usize),
    Skipped,
    Failed(String),
}

impl ScopeScheduler {
    #[must_use]
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit: default_limit.max(1),
        }
    }

    /// Concurrency limit for a connector config.
    ///
    /// `max_concurrent_scopes` wins, then the connector's own key, then the
    /// scheduler default. Zero is treated as one.
    #[must_use]
    pub fn limit_for(&self, config: &ConfigBlob, connector_key: Option<&str>) -> usize {
        let read = |key: &str| config.get(key).and_then(Value::as_u64);
        read(CONCURRENCY_KEY)
            .or_else(|| connector_key.and_then(read))
            .map_or(self.default_limit, |n| n as usize)
            .max(1)
    }

    /// Run identity and resource fetches for every scope of `config`.
    ///
    /// Only a config that cannot be expanded into scopes fails the whole
    /// call. Records are returned in scope order; within a scope identities
    /// come before resources.
    pub async fn discover(
        &self,
        connector: SharedConnector,
        config: &ConfigBlob,
    ) -> ConnectorResult<ConnectorRun> {
        let name = connector.name().to_string();
        let scopes = expand_scopes(config)?;
        let limit = self.limit_for(config, connector.concurrency_key());
        let normalizer = Arc::new(Normalizer::new(name.clone(), connector.scope_tag()));
        let semaphore = Arc::new(Semaphore::new(limit));

        info!(
            connector = %name,
            scopes = scopes.len(),
            max_concurrent = limit,
            mode = ?connector.execution_mode(),
            "Starting discovery"
        );

        let mut join_set = JoinSet::new();
        let mut tasks = HashMap::with_capacity(scopes.len());
        for scope in scopes {
            let connector = connector.clone();
            let normalizer = normalizer.clone();
            let semaphore = semaphore.clone();
            let span = tracing::info_span!("scope", connector = %name, scope = %scope.label);
            let task = (scope.index, scope.label.clone());
            let handle = join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    run_scope(connector, normalizer, scope).await
                }
                .instrument(span),
            );
            tasks.insert(handle.id(), task);
        }

        let mut results = join_scopes(join_set, tasks, &name).await;
        results.sort_by_key(|r| r.index);

        let mut records = Vec::new();
        let mut reports = Vec::with_capacity(results.len() * 2);
        for result in results {
            for (kind, fetch) in [
                (FetchKind::Identities, result.identities),
                (FetchKind::Resources, result.resources),
            ] {
                let outcome = match fetch {
                    ScopeFetch::Records(batch, fetched) => {
                        records.extend(batch);
                        ScopeOutcome::Fetched(fetched)
                    }
                    ScopeFetch::Skipped => ScopeOutcome::Skipped,
                    ScopeFetch::Failed(message) => ScopeOutcome::Failed(message),
                };
                reports.push(ScopeReport {
                    scope: result.label.clone(),
                    kind,
                    outcome,
                });
            }
        }

        let run = ConnectorRun {
            connector: name,
            records,
            scopes: reports,
        };
        info!(
            connector = %run.connector,
            records = run.records.len(),
            failed_scopes = run.failed_scopes().count(),
            "Discovery finished"
        );
        Ok(run)
    }
}

/// Await every scope task. A task that panicked outside the fetch or was
/// cancelled is reported as a failure of its scope.
async fn join_scopes(
    mut join_set: JoinSet<ScopeResult>,
    mut tasks: HashMap<Id, (usize, String)>,
    connector: &str,
) -> Vec<ScopeResult> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                tasks.remove(&id);
                results.push(result);
            }
            Err(e) => {
                let Some((index, label)) = tasks.remove(&e.id()) else {
                    error!(connector, error = %e, "Unknown scope task aborted");
                    continue;
                };
                error!(connector, scope = %label, error = %e, "Scope task aborted");
                let message = format!("scope task aborted: {e}");
                results.push(ScopeResult {
                    index,
                    label,
                    identities: ScopeFetch::Failed(message.clone()),
                    resources: ScopeFetch::Failed(message),
                });
            }
        }
    }
    results
}

async fn run_scope(
    connector: SharedConnector,
    normalizer: Arc<Normalizer>,
    scope: Scope,
) -> ScopeResult {
    let identities = fetch_and_normalize(&connector, &normalizer, &scope, FetchKind::Identities).await;
    let resources = fetch_and_normalize(&connector, &normalizer, &scope, FetchKind::Resources).await;
    ScopeResult {
        index: scope.index,
        label: scope.label,
        identities,
        resources,
    }
}

async fn fetch_and_normalize(
    connector: &SharedConnector,
    normalizer: &Normalizer,
    scope: &Scope,
    kind: FetchKind,
) -> ScopeFetch {
    match fetch(connector, scope, kind).await {
        Ok(raw) => {
            let fetched = raw.len();
            let batch = normalizer.normalize_all(raw, &scope.label);
            debug!(%kind, fetched, emitted = batch.len(), "Scope fetch complete");
            ScopeFetch::Records(batch, fetched)
        }
        Err(e) if e.is_unsupported() => {
            debug!(%kind, "Connector does not support this fetch");
            ScopeFetch::Skipped
        }
        Err(e) => {
            warn!(%kind, error = %e, error_code = e.error_code(), "Scope fetch failed");
            ScopeFetch::Failed(e.to_string())
        }
    }
}

/// Drive one fetch according to the connector's execution mode.
async fn fetch(
    connector: &SharedConnector,
    scope: &Scope,
    kind: FetchKind,
) -> ConnectorResult<Vec<RawRecord>> {
    match connector.execution_mode() {
        ExecutionMode::Async => {
            let call = async {
                match kind {
                    FetchKind::Identities => connector.fetch_identities(scope).await,
                    FetchKind::Resources => connector.fetch_resources(scope).await,
                }
            };
            AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ConnectorError::internal(format!("{kind} fetch panicked"))))
        }
        ExecutionMode::Blocking => {
            let connector = connector.clone();
            let scope = scope.clone();
            // No runtime context is entered here: blocking clients may run
            // their own runtime internally.
            tokio::task::spawn_blocking(move || {
                futures::executor::block_on(async {
                    match kind {
                        FetchKind::Identities => connector.fetch_identities(&scope).await,
                        FetchKind::Resources => connector.fetch_resources(&scope).await,
                    }
                })
            })
            .await
            .unwrap_or_else(|e| {
                Err(ConnectorError::internal_with_source(
                    format!("{kind} fetch did not complete"),
                    e,
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ConnectorContext, DiscoveryConnector};
    use crate::types::ObjectType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns users named after its scope; scope "beta" fails.
    struct ScriptedConnector {
        mode: ExecutionMode,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(mode: ExecutionMode) -> Self {
            Self {
                mode,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DiscoveryConnector for ScriptedConnector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn validate_config(&self, _config: &ConfigBlob) -> ConnectorResult<()> {
            Ok(())
        }

        async fn initialize(
            &mut self,
            _config: &ConfigBlob,
            _ctx: &ConnectorContext,
        ) -> ConnectorResult<()> {
            Ok(())
        }

        async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            match self.mode {
                ExecutionMode::Async => tokio::time::sleep(Duration::from_millis(20)).await,
                ExecutionMode::Blocking => std::thread::sleep(Duration::from_millis(20)),
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let domain = scope.get_str("domain").unwrap_or_default();
            if domain == "beta" {
                return Err(ConnectorError::network("beta is unreachable"));
            }
            let shared = RawRecord::from_value(ObjectType::User, json!({"id": "shared"}))?
                .with_id_from(&["id"]);
            let own = RawRecord::from_value(ObjectType::User, json!({"id": format!("{domain}-1")}))?
                .with_id_from(&["id"]);
            Ok(vec![shared, own])
        }

        fn execution_mode(&self) -> ExecutionMode {
            self.mode
        }

        fn scope_tag(&self) -> Option<&'static str> {
            Some("domain")
        }
    }

    fn config(max: Option<u64>) -> ConfigBlob {
        let mut value = json!({"domains": ["alpha", "beta", "gamma"]});
        if let Some(max) = max {
            value[CONCURRENCY_KEY] = json!(max);
        }
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_failing_scope_does_not_abort_siblings() {
        let connector: SharedConnector = Arc::new(ScriptedConnector::new(ExecutionMode::Async));
        let run = ScopeScheduler::default()
            .discover(connector, &config(None))
            .await
            .unwrap();

        let ids: Vec<_> = run.records.iter().map(|r| r.unique_id.as_str()).collect();
        assert!(ids.contains(&"alpha-1"));
        assert!(ids.contains(&"gamma-1"));
        assert_eq!(ids.iter().filter(|id| **id == "shared").count(), 1);
        assert_eq!(run.records.len(), 3);

        let failed: Vec<_> = run.failed_scopes().map(|r| r.scope.as_str()).collect();
        assert_eq!(failed, vec!["beta"]);

        // The default fetch_resources is reported as skipped, not failed.
        assert!(run
            .scopes
            .iter()
            .filter(|r| r.kind == FetchKind::Resources)
            .all(|r| r.outcome == ScopeOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_aborted_scope_task_is_reported_as_failed() {
        let mut join_set = JoinSet::new();
        let mut tasks = HashMap::new();

        let ok = join_set.spawn(async {
            ScopeResult {
                index: 0,
                label: "alpha".to_string(),
                identities: ScopeFetch::Records(Vec::new(), 0),
                resources: ScopeFetch::Skipped,
            }
        });
        tasks.insert(ok.id(), (0, "alpha".to_string()));
        let crashed = join_set.spawn(async { panic!("normalizer bug") });
        tasks.insert(crashed.id(), (1, "beta".to_string()));

        let mut results = join_scopes(join_set, tasks, "scripted").await;
        results.sort_by_key(|r| r.index);

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].label, "beta");
        assert!(matches!(results[1].identities, ScopeFetch::Failed(_)));
        assert!(matches!(results[1].resources, ScopeFetch::Failed(_)));
        assert!(matches!(results[0].identities, ScopeFetch::Records(_, 0)));
    }

    #[tokio::test]
    async fn test_records_are_tagged_with_scope() {
        let connector: SharedConnector = Arc::new(ScriptedConnector::new(ExecutionMode::Async));
        let run = ScopeScheduler::default()
            .discover(connector, &config(None))
            .await
            .unwrap();

        let gamma = run
            .records
            .iter()
            .find(|r| r.unique_id == "gamma-1")
            .unwrap();
        assert_eq!(
            gamma.scope_tag,
            Some(("domain".to_string(), "gamma".to_string()))
        );
        assert_eq!(gamma.source, "scripted");
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let connector = Arc::new(ScriptedConnector::new(ExecutionMode::Async));
        let shared: SharedConnector = connector.clone();
        ScopeScheduler::default()
            .discover(shared, &config(Some(1)))
            .await
            .unwrap();
        assert_eq!(connector.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_connector_runs_on_blocking_pool() {
        let connector: SharedConnector = Arc::new(ScriptedConnector::new(ExecutionMode::Blocking));
        let run = ScopeScheduler::default()
            .discover(connector, &config(None))
            .await
            .unwrap();
        assert_eq!(run.records.len(), 3);
        assert_eq!(run.failed_scopes().count(), 1);
    }

    #[test]
    fn test_limit_resolution() {
        let scheduler = ScopeScheduler::new(4);
        assert_eq!(scheduler.limit_for(&ConfigBlob::new(), None), 4);
        assert_eq!(scheduler.limit_for(&config(Some(2)), None), 2);
        assert_eq!(scheduler.limit_for(&config(Some(0)), None), 1);

        let mut cfg = ConfigBlob::new();
        cfg.insert("max_workers".to_string(), json!(7));
        assert_eq!(scheduler.limit_for(&cfg, Some("max_workers")), 7);
    }

    #[tokio::test]
    async fn test_invalid_scope_list_fails_whole_call() {
        let connector: SharedConnector = Arc::new(ScriptedConnector::new(ExecutionMode::Async));
        let mut cfg = ConfigBlob::new();
        cfg.insert("domains".to_string(), json!("not-a-list"));
        let err = ScopeScheduler::default()
            .discover(connector, &cfg)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
