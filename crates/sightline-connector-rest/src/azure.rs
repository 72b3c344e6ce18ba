//! Azure resource discovery through Resource Graph.

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use sightline_connector::prelude::*;
use tracing::{debug, info, instrument};

use crate::client::{array_field, base_url, join, require_ctx, to_records, SaasClient};

const RESOURCE_GRAPH_API_VERSION: &str = "2022-10-01";

/// Resource Graph caps `$top` at 1000 rows per page.
const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct AzureSettings {
    #[serde(alias = "subscription_id")]
    pub subscription: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// KQL run against the subscription.
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_query() -> String {
    "Resources | project id, name, type, location, resourceGroup, tags".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_login_endpoint() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".to_string()
}

impl AzureSettings {
    #[must_use]
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            self.tenant_id
        )
    }

    #[must_use]
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.management_endpoint.trim_end_matches('/'))
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.subscription.trim().is_empty() {
            return Err(ConnectorError::invalid_config("subscription is required"));
        }
        if self.query.trim().is_empty() {
            return Err(ConnectorError::invalid_config("query must not be empty"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConnectorError::invalid_config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        base_url("management_endpoint", &self.management_endpoint)?;
        base_url("login_endpoint", &self.login_endpoint)?;
        Ok(())
    }

    /// Request body for one page of the query.
    fn request_body(&self, skip_token: Option<&str>) -> Value {
        let mut options = json!({
            "$top": self.page_size,
            "resultFormat": "objectArray"
        });
        if let Some(token) = skip_token {
            options["$skipToken"] = json!(token);
        }
        json!({
            "subscriptions": [self.subscription],
            "query": self.query,
            "options": options
        })
    }
}

/// Azure connector, registered as `azure`. One scope per subscription.
///
/// Resource Graph has no modification filter, so a watermark is ignored.
#[derive(Debug, Default)]
pub struct AzureConnector {
    ctx: Option<ConnectorContext>,
}

impl AzureConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, settings: &AzureSettings) -> ConnectorResult<SaasClient> {
        let ctx = require_ctx(self.name(), &self.ctx)?;
        let retry = &settings.rate_limit_retry;
        let exchange = OAuthExchange::new(
            ctx.http
                .with_policies(retry.retry_policy(), retry.rate_limit_policy()),
            settings.token_url(),
            OAuthGrant::ClientCredentials {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                scope: Some(settings.token_scope()),
            },
        );
        Ok(SaasClient::new(
            ctx,
            retry,
            format!("azure:{}:{}", settings.tenant_id, settings.client_id),
            Box::new(exchange),
        ))
    }
}

#[async_trait]
impl DiscoveryConnector for AzureConnector {
    fn name(&self) -> &str {
        "azure"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            scope
                .settings::<AzureSettings>()
                .and_then(|settings| settings.validate())
                .map_err(|e| {
                    ConnectorError::invalid_config(format!("subscription '{}': {e}", scope.label))
                })?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "Azure connector initialized");
        Ok(())
    }

    /// Azure identities live in Entra ID; see the `entraid` connector.
    async fn fetch_identities(&self, _scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        Err(ConnectorError::unsupported("azure: fetch_identities"))
    }

    #[instrument(skip(self, scope), fields(connector = "azure", subscription = %scope.label))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        if let Some(wm) = scope.watermark() {
            debug!(last_run = wm.raw(), "Resource Graph has no modification filter, watermark ignored");
        }
        let settings: AzureSettings = scope.settings()?;
        settings.validate()?;
        let client = self.client(&settings)?;
        let management = base_url("management_endpoint", &settings.management_endpoint)?;
        let url = format!(
            "{}?api-version={RESOURCE_GRAPH_API_VERSION}",
            join(&management, "providers/Microsoft.ResourceGraph/resources")?
        );

        let rows = collect_pages(None, |cursor| {
            let skip_token = match cursor {
                Some(PageCursor::Token(token)) => Some(token),
                _ => None,
            };
            let body = settings.request_body(skip_token.as_deref());
            let client = &client;
            let url = url.as_str();
            async move {
                let response = client.post(url, &body).await?.body;
                let next = response
                    .get("$skipToken")
                    .and_then(Value::as_str)
                    .map(|t| PageCursor::Token(t.to_string()));
                Ok::<_, ConnectorError>(Page::new(array_field(&response, "data")?, next))
            }
        })
        .await?;

        info!(subscription = %settings.subscription, count = rows.len(), "Azure resources fetched");
        to_records(ObjectType::Resource, rows, &["id"])
    }

    fn scope_tag(&self) -> Option<&'static str> {
        Some("subscription")
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}
