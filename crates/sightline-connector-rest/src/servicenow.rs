//! ServiceNow user discovery through the Table API.

use secrecy::SecretString;
use serde::Deserialize;
use sightline_connector::prelude::*;
use tracing::{info, instrument};

use crate::client::{array_field, base_url, join, require_ctx, to_records, SaasClient};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceNowSettings {
    /// e.g. `https://acme.service-now.com`
    pub instance_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Defaults to `{instance_url}/oauth_token.do`.
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_sysparm_limit")]
    pub sysparm_limit: u64,
    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_table() -> String {
    "sys_user".to_string()
}

fn default_sysparm_limit() -> u64 {
    100
}

impl ServiceNowSettings {
    #[must_use]
    pub fn token_url(&self) -> String {
        self.token_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/oauth_token.do", self.instance_url.trim_end_matches('/')))
    }

    /// Encoded query restricting rows to those updated since `watermark`.
    #[must_use]
    pub fn sysparm_query(watermark: Option<&Watermark>) -> Option<String> {
        watermark.map(|wm| format!("sys_updated_on>={}", wm.to_servicenow()))
    }
}

/// ServiceNow connector: client-credentials token, offset paging.
#[derive(Debug, Default)]
pub struct ServiceNowConnector {
    ctx: Option<ConnectorContext>,
}

impl ServiceNowConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, settings: &ServiceNowSettings) -> ConnectorResult<SaasClient> {
        let ctx = require_ctx(self.name(), &self.ctx)?;
        let retry = &settings.rate_limit_retry;
        let exchange = OAuthExchange::new(
            ctx.http
                .with_policies(retry.retry_policy(), retry.rate_limit_policy()),
            settings.token_url(),
            OAuthGrant::ClientCredentials {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                scope: None,
            },
        );
        Ok(SaasClient::new(
            ctx,
            retry,
            format!("servicenow:{}", settings.instance_url.trim_end_matches('/')),
            Box::new(exchange),
        ))
    }
}

#[async_trait]
impl DiscoveryConnector for ServiceNowConnector {
    fn name(&self) -> &str {
        "servicenow"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            let settings: ServiceNowSettings = scope.settings()?;
            base_url("instance_url", &settings.instance_url)?;
            if settings.sysparm_limit == 0 {
                return Err(ConnectorError::invalid_config("sysparm_limit must be positive"));
            }
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "ServiceNow connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "servicenow"))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings: ServiceNowSettings = scope.settings()?;
        let client = self.client(&settings)?;
        let instance = base_url("instance_url", &settings.instance_url)?;
        let table_url = join(&instance, &format!("api/now/table/{}", settings.table))?;
        let filter = ServiceNowSettings::sysparm_query(scope.watermark().as_ref());

        let initial = PageCursor::first_offset(settings.sysparm_limit);
        let rows = collect_pages(Some(initial), |cursor| {
            let window = cursor.unwrap_or(PageCursor::first_offset(settings.sysparm_limit));
            let (offset, limit) = match window {
                PageCursor::Offset { offset, limit } => (offset, limit),
                _ => (0, settings.sysparm_limit),
            };
            let mut query = vec![
                ("sysparm_limit", limit.to_string()),
                ("sysparm_offset", offset.to_string()),
            ];
            if let Some(filter) = &filter {
                query.push(("sysparm_query", filter.clone()));
            }
            let next = window.advance();
            let client = &client;
            let url = table_url.as_str();
            async move {
                let body = client.get(url, &query).await?.body;
                Ok::<_, ConnectorError>(Page::new(array_field(&body, "result")?, next))
            }
        })
        .await?;

        info!(table = %settings.table, count = rows.len(), "ServiceNow rows fetched");
        to_records(ObjectType::User, rows, &["sys_id"])
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_url_default_and_override() {
        let mut value = json!({
            "instance_url": "https://acme.service-now.com/",
            "client_id": "c",
            "client_secret": "s"
        });
        let settings: ServiceNowSettings = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(settings.token_url(), "https://acme.service-now.com/oauth_token.do");
        assert_eq!(settings.table, "sys_user");
        assert_eq!(settings.sysparm_limit, 100);

        value["token_endpoint"] = json!("https://sso.acme.com/token");
        let settings: ServiceNowSettings = serde_json::from_value(value).unwrap();
        assert_eq!(settings.token_url(), "https://sso.acme.com/token");
    }

    #[test]
    fn test_sysparm_query() {
        assert_eq!(ServiceNowSettings::sysparm_query(None), None);
        let wm = Watermark::new("2024-05-06T07:08:09Z");
        assert_eq!(
            ServiceNowSettings::sysparm_query(Some(&wm)).as_deref(),
            Some("sys_updated_on>=2024-05-06 07:08:09")
        );
    }
}
