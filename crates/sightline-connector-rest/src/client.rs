//! Authenticated HTTP access shared by the SaaS connectors.

use serde_json::Value;
use sightline_connector::prelude::*;
use std::sync::Arc;
use url::Url;

/// Vendor client bound to one credential set.
pub(crate) struct SaasClient {
    http: VendorHttp,
    tokens: Arc<TokenCache>,
    cache_key: String,
    exchange: Box<dyn CredentialExchange>,
}

impl SaasClient {
    pub(crate) fn new(
        ctx: &ConnectorContext,
        retry: &RetrySettings,
        cache_key: String,
        exchange: Box<dyn CredentialExchange>,
    ) -> Self {
        Self {
            http: ctx
                .http
                .with_policies(retry.retry_policy(), retry.rate_limit_policy()),
            tokens: ctx.token_cache.clone(),
            cache_key,
            exchange,
        }
    }

    /// Authenticated GET.
    pub(crate) async fn get(&self, url: &str, query: &[(&str, String)]) -> ConnectorResult<VendorResponse> {
        let token = self
            .tokens
            .get_token(&self.cache_key, self.exchange.as_ref())
            .await?;
        self.http.get_json(url, query, RequestAuth::Bearer(&token)).await
    }

    /// Authenticated JSON POST to a read-only query endpoint.
    pub(crate) async fn post(&self, url: &str, body: &Value) -> ConnectorResult<VendorResponse> {
        let token = self
            .tokens
            .get_token(&self.cache_key, self.exchange.as_ref())
            .await?;
        self.http.post_json(url, body, RequestAuth::Bearer(&token)).await
    }
}

/// The initialized context, or `NotInitialized`.
pub(crate) fn require_ctx<'a>(
    connector: &str,
    ctx: &'a Option<ConnectorContext>,
) -> ConnectorResult<&'a ConnectorContext> {
    ctx.as_ref().ok_or_else(|| ConnectorError::NotInitialized {
        connector: connector.to_string(),
    })
}

/// Parse a base URL setting, keeping exactly one trailing slash so that
/// relative joins append rather than replace the last path segment.
pub(crate) fn base_url(key: &str, raw: &str) -> ConnectorResult<Url> {
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    Url::parse(&normalized)
        .map_err(|e| ConnectorError::invalid_config(format!("{key} '{raw}' is not a valid URL: {e}")))
}

/// Join `path` onto `base`.
pub(crate) fn join(base: &Url, path: &str) -> ConnectorResult<String> {
    base.join(path.trim_start_matches('/'))
        .map(String::from)
        .map_err(|e| ConnectorError::invalid_config(format!("cannot join '{path}' onto {base}: {e}")))
}

/// Turn a JSON array of vendor objects into identified records.
pub(crate) fn to_records(
    object_type: ObjectType,
    items: Vec<Value>,
    id_keys: &[&str],
) -> ConnectorResult<Vec<RawRecord>> {
    items
        .into_iter()
        .map(|item| Ok(RawRecord::from_value(object_type, item)?.with_id_from(id_keys)))
        .collect()
}

/// The array under `key`, or an empty list when absent.
pub(crate) fn array_field(body: &Value, key: &str) -> ConnectorResult<Vec<Value>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ConnectorError::invalid_data(format!(
            "expected '{key}' to be an array"
        ))),
    }
}
