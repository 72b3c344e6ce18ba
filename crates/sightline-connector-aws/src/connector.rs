//! AWS discovery connector.

use sightline_connector::prelude::*;
use tracing::{debug, info, instrument};

use crate::config::AwsSettings;
use crate::error::classify;
use crate::records::{resource_record, role_record, user_record};

/// SDK clients for one region scope.
struct RegionClients {
    iam: aws_sdk_iam::Client,
    tagging: aws_sdk_resourcegroupstagging::Client,
    retry: RetryPolicy,
    rate_limit: RateLimitPolicy,
    settings: AwsSettings,
}

impl RegionClients {
    async fn connect(scope: &Scope) -> ConnectorResult<Self> {
        let settings: AwsSettings = scope.settings()?;
        let sdk_config = settings.load_sdk_config().await;
        Ok(Self {
            iam: aws_sdk_iam::Client::new(&sdk_config),
            tagging: aws_sdk_resourcegroupstagging::Client::new(&sdk_config),
            retry: settings.rate_limit_retry.retry_policy(),
            rate_limit: settings.rate_limit_retry.rate_limit_policy(),
            settings,
        })
    }

    async fn list_users(&self) -> ConnectorResult<Vec<RawRecord>> {
        collect_pages(None, |cursor| async move {
            let marker = token(cursor);
            let out = self
                .retry
                .run("iam:ListUsers", || {
                    self.rate_limit.run("iam:ListUsers", || {
                        let request = self
                            .iam
                            .list_users()
                            .max_items(self.settings.iam_page_size)
                            .set_marker(marker.clone());
                        async move { request.send().await.map_err(|e| classify("iam:ListUsers", e)) }
                    })
                })
                .await?;

            let next = out
                .is_truncated()
                .then(|| out.marker().map(|m| PageCursor::Token(m.to_string())))
                .flatten();
            Ok::<_, ConnectorError>(Page::new(out.users().iter().map(user_record).collect(), next))
        })
        .await
    }

    async fn list_roles(&self) -> ConnectorResult<Vec<RawRecord>> {
        collect_pages(None, |cursor| async move {
            let marker = token(cursor);
            let out = self
                .retry
                .run("iam:ListRoles", || {
                    self.rate_limit.run("iam:ListRoles", || {
                        let request = self
                            .iam
                            .list_roles()
                            .max_items(self.settings.iam_page_size)
                            .set_marker(marker.clone());
                        async move { request.send().await.map_err(|e| classify("iam:ListRoles", e)) }
                    })
                })
                .await?;

            let next = out
                .is_truncated()
                .then(|| out.marker().map(|m| PageCursor::Token(m.to_string())))
                .flatten();
            Ok::<_, ConnectorError>(Page::new(out.roles().iter().map(role_record).collect(), next))
        })
        .await
    }

    async fn list_tagged_resources(&self) -> ConnectorResult<Vec<RawRecord>> {
        collect_pages(None, |cursor| async move {
            let pagination_token = token(cursor);
            let out = self
                .retry
                .run("tagging:GetResources", || {
                    self.rate_limit.run("tagging:GetResources", || {
                        let request = self
                            .tagging
                            .get_resources()
                            .resources_per_page(self.settings.page_size)
                            .set_pagination_token(pagination_token.clone());
                        async move {
                            request
                                .send()
                                .await
                                .map_err(|e| classify("tagging:GetResources", e))
                        }
                    })
                })
                .await?;

            // The tagging API signals the last page with an empty token.
            let next = out
                .pagination_token()
                .map(|t| PageCursor::Token(t.to_string()));
            let records = out
                .resource_tag_mapping_list()
                .iter()
                .filter_map(resource_record)
                .collect();
            Ok::<_, ConnectorError>(Page::new(records, next))
        })
        .await
    }
}

fn token(cursor: Option<PageCursor>) -> Option<String> {
    match cursor {
        Some(PageCursor::Token(token)) => Some(token),
        _ => None,
    }
}

/// IAM users and roles plus tagged resources, fanned out over `regions`.
///
/// IAM is global, so every region scope returns the same identities; the
/// normalizer's deduplication keeps the first.
#[derive(Debug, Default)]
pub struct AwsConnector {
    initialized: bool,
}

impl AwsConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_initialized(&self) -> ConnectorResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ConnectorError::NotInitialized {
                connector: self.name().to_string(),
            })
        }
    }
}

#[async_trait]
impl DiscoveryConnector for AwsConnector {
    fn name(&self) -> &str {
        "aws"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            let settings: AwsSettings = scope.settings()?;
            settings.validate().map_err(|e| {
                ConnectorError::invalid_config(format!("region '{}': {e}", scope.label))
            })?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, _ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.initialized = true;
        info!(connector = self.name(), "AWS connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "aws", region = %scope.label))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        self.ensure_initialized()?;
        if let Some(watermark) = scope.watermark() {
            debug!(last_run = watermark.raw(), "IAM listings are always full, ignoring watermark");
        }

        let clients = RegionClients::connect(scope).await?;
        let mut records = clients.list_users().await?;
        records.extend(clients.list_roles().await?);
        debug!(count = records.len(), "IAM identities fetched");
        Ok(records)
    }

    #[instrument(skip(self, scope), fields(connector = "aws", region = %scope.label))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        self.ensure_initialized()?;
        let clients = RegionClients::connect(scope).await?;
        let records = clients.list_tagged_resources().await?;
        debug!(count = records.len(), "Tagged resources fetched");
        Ok(records)
    }

    fn scope_tag(&self) -> Option<&'static str> {
        Some("region")
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(value: serde_json::Value) -> ConfigBlob {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_validate_reports_region() {
        let config = blob(json!({
            "regions": ["us-east-1", {"region": "eu-west-1", "page_size": 500}]
        }));
        let err = AwsConnector::new().validate_config(&config).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("eu-west-1"), "{err}");
    }

    #[tokio::test]
    async fn test_fetch_before_initialize() {
        let scope = Scope::single(blob(json!({"region": "us-east-1"})));
        let err = AwsConnector::new().fetch_identities(&scope).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let config = blob(json!({
            "region": "us-east-1",
            "access_key_id": "AKIDEXAMPLE",
            "secret_access_key": "secret",
            "endpoint_url": "http://127.0.0.1:1",
            "rate_limit_retry": {"max_attempts": 2, "base_delay": 0.001, "max_delay": 0.01}
        }));
        let mut connector = AwsConnector::new();
        connector.validate_config(&config).unwrap();
        connector
            .initialize(&config, &ConnectorContext::default())
            .await
            .unwrap();

        let err = connector
            .fetch_resources(&Scope::single(config))
            .await
            .unwrap_err();
        match err {
            ConnectorError::RetriesExhausted { call, attempts, source } => {
                assert_eq!(call, "tagging:GetResources");
                assert_eq!(attempts, 2);
                assert!(matches!(*source, ConnectorError::ConnectionFailed { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
