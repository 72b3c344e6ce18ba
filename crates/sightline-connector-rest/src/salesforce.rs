//! Salesforce user discovery through the SOQL query API.

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use sightline_connector::prelude::*;
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::{array_field, base_url, join, require_ctx, to_records, SaasClient};

#[derive(Debug, Clone, Deserialize)]
pub struct SalesforceSettings {
    /// e.g. `https://acme.my.salesforce.com`
    pub instance_url: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    /// Password with the security token appended.
    pub password: SecretString,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_token_endpoint() -> String {
    "https://login.salesforce.com/services/oauth2/token".to_string()
}

fn default_query() -> String {
    "SELECT Id, Username, Email, Name, LastModifiedDate FROM User".to_string()
}

fn default_api_version() -> String {
    "v59.0".to_string()
}

impl SalesforceSettings {
    /// The configured query, restricted to rows modified after `watermark`.
    #[must_use]
    pub fn soql(&self, watermark: Option<&Watermark>) -> String {
        let Some(wm) = watermark else {
            return self.query.clone();
        };
        let clause = format!("LastModifiedDate > {}", wm.to_rfc3339());
        let query = self.query.trim();
        let clauses = top_level_clauses(query);
        let where_at = clauses.iter().find(|(_, kw)| *kw == Clause::Where).map(|(at, _)| *at);
        let tail_at = clauses
            .iter()
            .find(|(at, kw)| *kw != Clause::Where && where_at.map_or(true, |w| *at > w))
            .map_or(query.len(), |(at, _)| *at);

        let (head, tail) = query.split_at(tail_at);
        let head = head.trim_end();
        let tail = if tail.is_empty() { String::new() } else { format!(" {tail}") };
        match where_at {
            Some(at) => {
                let condition = head[at + "WHERE".len()..].trim();
                format!("{} ({condition}) AND {clause}{tail}", &head[..at + "WHERE".len()])
            }
            None => format!("{head} WHERE {clause}{tail}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Where,
    GroupBy,
    OrderBy,
    Limit,
    Offset,
}

/// Byte offsets of the clause keywords outside string literals and
/// subqueries, matched case-insensitively as whole words.
fn top_level_clauses(query: &str) -> Vec<(usize, Clause)> {
    let mut words: Vec<(usize, String)> = Vec::new();
    let mut depth = 0i32;
    let mut in_literal = false;
    let mut escaped = false;
    let mut word_start: Option<usize> = None;

    for (i, ch) in query.char_indices() {
        let in_word = !in_literal && depth == 0 && (ch.is_ascii_alphanumeric() || ch == '_');
        if !in_word {
            if let Some(start) = word_start.take() {
                words.push((start, query[start..i].to_ascii_uppercase()));
            }
        }
        if in_literal {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_literal = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' => in_literal = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if in_word && word_start.is_none() => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(start) = word_start {
        words.push((start, query[start..].to_ascii_uppercase()));
    }

    let mut clauses = Vec::new();
    for (n, (at, word)) in words.iter().enumerate() {
        let followed_by_by = words.get(n + 1).is_some_and(|(_, next)| next == "BY");
        let clause = match word.as_str() {
            "WHERE" => Clause::Where,
            "GROUP" if followed_by_by => Clause::GroupBy,
            "ORDER" if followed_by_by => Clause::OrderBy,
            "LIMIT" => Clause::Limit,
            "OFFSET" => Clause::Offset,
            _ => continue,
        };
        clauses.push((*at, clause));
    }
    clauses
}

/// Salesforce connector: password-grant token, `nextRecordsUrl` paging.
#[derive(Debug, Default)]
pub struct SalesforceConnector {
    ctx: Option<ConnectorContext>,
}

impl SalesforceConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, settings: &SalesforceSettings) -> ConnectorResult<SaasClient> {
        let ctx = require_ctx(self.name(), &self.ctx)?;
        let retry = &settings.rate_limit_retry;
        let exchange = OAuthExchange::new(
            ctx.http
                .with_policies(retry.retry_policy(), retry.rate_limit_policy()),
            settings.token_endpoint.clone(),
            OAuthGrant::Password {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
        );
        Ok(SaasClient::new(
            ctx,
            retry,
            format!("salesforce:{}", settings.instance_url.trim_end_matches('/')),
            Box::new(exchange),
        ))
    }
}

#[async_trait]
impl DiscoveryConnector for SalesforceConnector {
    fn name(&self) -> &str {
        "salesforce"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            let settings: SalesforceSettings = scope.settings()?;
            base_url("instance_url", &settings.instance_url)?;
            base_url("token_endpoint", &settings.token_endpoint)?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "Salesforce connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "salesforce"))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings: SalesforceSettings = scope.settings()?;
        let client = self.client(&settings)?;
        let instance: Url = base_url("instance_url", &settings.instance_url)?;
        let query_url = join(&instance, &format!("services/data/{}/query", settings.api_version))?;
        let soql = settings.soql(scope.watermark().as_ref());
        debug!(soql = %soql, "Running SOQL query");

        let records = collect_pages(None, |cursor| {
            let request = match cursor {
                Some(PageCursor::NextUrl(next)) => join(&instance, &next).map(|url| (url, Vec::new())),
                _ => Ok((query_url.clone(), vec![("q", soql.clone())])),
            };
            let client = &client;
            async move {
                let (url, query) = request?;
                let body = client.get(&url, &query).await?.body;
                let next = body
                    .get("nextRecordsUrl")
                    .and_then(Value::as_str)
                    .map(|next| PageCursor::NextUrl(next.to_string()));
                Ok::<_, ConnectorError>(Page::new(array_field(&body, "records")?, next))
            }
        })
        .await?;

        info!(instance = %settings.instance_url, count = records.len(), "Salesforce users fetched");
        to_records(ObjectType::User, records, &["Id"])
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(query: Option<&str>) -> SalesforceSettings {
        let mut value = json!({
            "instance_url": "https://acme.my.salesforce.com",
            "client_id": "cid",
            "client_secret": "cs",
            "username": "svc@acme.com",
            "password": "pwtoken"
        });
        if let Some(q) = query {
            value["query"] = json!(q);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_soql_without_watermark_is_unchanged() {
        assert_eq!(
            settings(None).soql(None),
            "SELECT Id, Username, Email, Name, LastModifiedDate FROM User"
        );
    }

    #[test]
    fn test_soql_appends_where() {
        let wm = Watermark::new("2024-02-01T00:00:00Z");
        assert_eq!(
            settings(None).soql(Some(&wm)),
            "SELECT Id, Username, Email, Name, LastModifiedDate FROM User \
             WHERE LastModifiedDate > 2024-02-01T00:00:00Z"
        );
    }

    #[test]
    fn test_soql_extends_existing_where() {
        let wm = Watermark::new("2024-02-01 10:00:00");
        assert_eq!(
            settings(Some("SELECT Id FROM User WHERE IsActive = true")).soql(Some(&wm)),
            "SELECT Id FROM User WHERE (IsActive = true) AND LastModifiedDate > 2024-02-01T10:00:00Z"
        );
    }

    #[test]
    fn test_soql_where_after_line_break() {
        let wm = Watermark::new("2024-02-01T00:00:00Z");
        assert_eq!(
            settings(Some("SELECT Id FROM User\nwhere IsActive = true OR UserType = 'Guest'")).soql(Some(&wm)),
            "SELECT Id FROM User\nwhere (IsActive = true OR UserType = 'Guest') AND LastModifiedDate > 2024-02-01T00:00:00Z"
        );
    }

    #[test]
    fn test_soql_filter_goes_before_order_and_limit() {
        let wm = Watermark::new("2024-02-01T00:00:00Z");
        assert_eq!(
            settings(Some("SELECT Id FROM User ORDER BY Name LIMIT 50")).soql(Some(&wm)),
            "SELECT Id FROM User WHERE LastModifiedDate > 2024-02-01T00:00:00Z ORDER BY Name LIMIT 50"
        );
        assert_eq!(
            settings(Some("SELECT Id FROM User WHERE IsActive = true\tORDER BY Name")).soql(Some(&wm)),
            "SELECT Id FROM User WHERE (IsActive = true) AND LastModifiedDate > 2024-02-01T00:00:00Z ORDER BY Name"
        );
    }

    #[test]
    fn test_soql_ignores_keywords_in_literals_and_subqueries() {
        let wm = Watermark::new("2024-02-01T00:00:00Z");
        assert_eq!(
            settings(Some("SELECT Id, (SELECT Id FROM Logins WHERE Status = 'where') FROM User"))
                .soql(Some(&wm)),
            "SELECT Id, (SELECT Id FROM Logins WHERE Status = 'where') FROM User \
             WHERE LastModifiedDate > 2024-02-01T00:00:00Z"
        );
    }

    #[test]
    fn test_defaults() {
        let s = settings(None);
        assert_eq!(s.token_endpoint, "https://login.salesforce.com/services/oauth2/token");
        assert_eq!(s.api_version, "v59.0");
    }

    #[tokio::test]
    async fn test_no_resources() {
        let connector = SalesforceConnector::new();
        let scope = Scope::single(ConfigBlob::new());
        assert!(connector.fetch_resources(&scope).await.unwrap_err().is_unsupported());
    }
}
