//! Microsoft Graph client with `@odata.nextLink` pagination.

use serde::Deserialize;
use serde_json::Value;
use sightline_connector::oauth::{OAuthExchange, OAuthGrant};
use sightline_connector::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::GraphSettings;

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
pub struct ODataPage {
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl ODataPage {
    fn into_page(self) -> Page<Value> {
        Page::new(self.value, self.next_link.map(PageCursor::NextUrl))
    }
}

/// Graph client bound to one tenant.
#[derive(Debug)]
pub struct GraphClient {
    http: VendorHttp,
    tokens: Arc<TokenCache>,
    exchange: OAuthExchange,
    cache_key: String,
    base_url: String,
    tenant_id: String,
}

impl GraphClient {
    pub fn new(settings: &GraphSettings, ctx: &ConnectorContext) -> Self {
        let retry = &settings.rate_limit_retry;
        let http = ctx
            .http
            .with_policies(retry.retry_policy(), retry.rate_limit_policy());
        let exchange = OAuthExchange::new(
            http.clone(),
            settings.token_url(),
            OAuthGrant::ClientCredentials {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                scope: Some(settings.token_scope()),
            },
        );
        Self {
            http,
            tokens: ctx.token_cache.clone(),
            exchange,
            cache_key: format!("graph:{}", settings.tenant_id),
            base_url: settings.api_base(),
            tenant_id: settings.tenant_id.clone(),
        }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Fetch every item of a collection.
    ///
    /// `query` applies to the first request only; `@odata.nextLink` already
    /// carries the first request's parameters.
    #[instrument(skip(self, query), fields(tenant_id = %self.tenant_id))]
    pub async fn list(&self, path: &str, query: &[(&str, String)]) -> ConnectorResult<Vec<Value>> {
        let first_url = self.url(path);
        let items = collect_pages(None, |cursor| {
            let (url, query) = match cursor {
                Some(PageCursor::NextUrl(next)) => (next, Vec::new()),
                _ => (first_url.clone(), query.to_vec()),
            };
            async move {
                let token = self.tokens.get_token(&self.cache_key, &self.exchange).await?;
                let response = self
                    .http
                    .get_json(&url, &query, RequestAuth::Bearer(&token))
                    .await?;
                let page: ODataPage = serde_json::from_value(response.body)?;
                Ok::<_, ConnectorError>(page.into_page())
            }
        })
        .await?;

        debug!(path, count = items.len(), "Graph collection fetched");
        Ok(items)
    }
}
