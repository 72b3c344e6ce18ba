//! Run report.

use sightline_connector::prelude::*;
use sightline_connector::registry::SkippedPlugin;
use std::collections::BTreeMap;
use std::fmt;

/// One failed fetch of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedScope {
    pub connector: String,
    pub scope: String,
    pub kind: FetchKind,
    pub message: String,
}

/// A connector that loaded but could not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedConnector {
    pub name: String,
    pub message: String,
}

/// Outcome of one discovery run.
///
/// A run never fails as a whole; every partial failure lands here.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Records accepted by the publisher.
    pub published: usize,
    /// Records the publisher rejected, or that could not be rendered.
    pub publish_failures: usize,
    /// Publisher lifecycle error (`start`, `flush` or `close`), if any.
    pub publisher_error: Option<String>,
    /// Distinct records per connector after deduplication.
    pub records_by_connector: BTreeMap<String, usize>,
    pub failed_scopes: Vec<FailedScope>,
    pub failed_connectors: Vec<FailedConnector>,
    pub skipped_connectors: Vec<SkippedPlugin>,
}

impl RunReport {
    /// Total records discovered across connectors.
    #[must_use]
    pub fn discovered(&self) -> usize {
        self.records_by_connector.values().sum()
    }

    /// True when every scope ran and every record was published.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_scopes.is_empty()
            && self.failed_connectors.is_empty()
            && self.publish_failures == 0
            && self.publisher_error.is_none()
    }

    pub(crate) fn record_connector_run(&mut self, run: &ConnectorRun) {
        self.records_by_connector
            .insert(run.connector.clone(), run.records.len());
        for report in run.failed_scopes() {
            let message = match &report.outcome {
                ScopeOutcome::Failed(message) => message.clone(),
                _ => continue,
            };
            self.failed_scopes.push(FailedScope {
                connector: run.connector.clone(),
                scope: report.scope.clone(),
                kind: report.kind,
                message,
            });
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "discovered {} records, published {}, {} publish failures",
            self.discovered(),
            self.published,
            self.publish_failures
        )?;
        for (connector, count) in &self.records_by_connector {
            writeln!(f, "  {connector}: {count} records")?;
        }
        for failed in &self.failed_scopes {
            writeln!(
                f,
                "  FAILED {}/{} {}: {}",
                failed.connector, failed.scope, failed.kind, failed.message
            )?;
        }
        for failed in &self.failed_connectors {
            writeln!(f, "  FAILED {}: {}", failed.name, failed.message)?;
        }
        for skipped in &self.skipped_connectors {
            writeln!(f, "  skipped {}: {}", skipped.name, skipped.reason)?;
        }
        if let Some(error) = &self.publisher_error {
            writeln!(f, "  publisher: {error}")?;
        }
        Ok(())
    }
}
