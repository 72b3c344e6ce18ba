//! GitHub organization discovery.

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use sightline_connector::prelude::*;
use tracing::{debug, info, instrument};

use crate::client::{array_field, base_url, join, require_ctx, to_records, SaasClient};

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSettings {
    /// Personal access token.
    pub github_token: SecretString,
    pub organization: String,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_api_endpoint() -> String {
    "https://api.github.com/".to_string()
}

fn default_per_page() -> u32 {
    100
}

/// Organization members as users, app installations as privileges.
///
/// GitHub exposes no modification filter on either listing, so a
/// watermark is ignored.
#[derive(Debug, Default)]
pub struct GithubConnector {
    ctx: Option<ConnectorContext>,
}

impl GithubConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, settings: &GithubSettings) -> ConnectorResult<SaasClient> {
        let ctx = require_ctx(self.name(), &self.ctx)?;
        Ok(SaasClient::new(
            ctx,
            &settings.rate_limit_retry,
            format!("github:{}", settings.organization),
            Box::new(StaticToken(settings.github_token.clone())),
        ))
    }

    /// Follow `Link: rel="next"` until exhausted. `items_key` selects the
    /// array for endpoints that wrap it in an object.
    async fn list(
        &self,
        client: &SaasClient,
        first_url: String,
        per_page: u32,
        items_key: Option<&str>,
    ) -> ConnectorResult<Vec<Value>> {
        collect_pages(None, |cursor| {
            let (url, query) = match cursor {
                Some(PageCursor::NextUrl(next)) => (next, Vec::new()),
                _ => (first_url.clone(), vec![("per_page", per_page.to_string())]),
            };
            async move {
                let response = client.get(&url, &query).await?;
                let next = response.next_link().map(PageCursor::NextUrl);
                let items = match items_key {
                    Some(key) => array_field(&response.body, key)?,
                    None => match response.body {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        _ => {
                            return Err(ConnectorError::invalid_data(format!(
                                "expected a JSON array from {url}"
                            )))
                        }
                    },
                };
                Ok::<_, ConnectorError>(Page::new(items, next))
            }
        })
        .await
    }

    fn note_watermark(scope: &Scope) {
        if let Some(wm) = scope.watermark() {
            debug!(last_run = wm.raw(), "GitHub has no modification filter, watermark ignored");
        }
    }
}

#[async_trait]
impl DiscoveryConnector for GithubConnector {
    fn name(&self) -> &str {
        "github"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            let settings: GithubSettings = scope.settings()?;
            base_url("api_endpoint", &settings.api_endpoint)?;
            if settings.organization.trim().is_empty() {
                return Err(ConnectorError::invalid_config("organization is required"));
            }
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "GitHub connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "github"))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        Self::note_watermark(scope);
        let settings: GithubSettings = scope.settings()?;
        let client = self.client(&settings)?;
        let base = base_url("api_endpoint", &settings.api_endpoint)?;
        let url = join(&base, &format!("orgs/{}/members", settings.organization))?;

        let members = self.list(&client, url, settings.per_page, None).await?;
        info!(organization = %settings.organization, count = members.len(), "GitHub members fetched");
        to_records(ObjectType::User, members, &["id", "login"])
    }

    #[instrument(skip(self, scope), fields(connector = "github"))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        Self::note_watermark(scope);
        let settings: GithubSettings = scope.settings()?;
        let client = self.client(&settings)?;
        let base = base_url("api_endpoint", &settings.api_endpoint)?;
        let url = join(&base, &format!("orgs/{}/installations", settings.organization))?;

        let installations = self
            .list(&client, url, settings.per_page, Some("installations"))
            .await?;
        info!(
            organization = %settings.organization,
            count = installations.len(),
            "GitHub app installations fetched"
        );
        let records = to_records(ObjectType::Privilege, installations, &["id"])?;
        Ok(records.into_iter().map(installation_key).collect())
    }
}

/// Installation ids come from the same numeric range as user ids.
fn installation_key(mut record: RawRecord) -> RawRecord {
    if let Some(id) = record.unique_id.take() {
        record.unique_id = Some(format!("installation:{id}"));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(value: Value) -> ConfigBlob {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_defaults() {
        let settings: GithubSettings =
            serde_json::from_value(json!({"github_token": "ghp_x", "organization": "acme"})).unwrap();
        assert_eq!(settings.api_endpoint, "https://api.github.com/");
        assert_eq!(settings.per_page, 100);
    }

    #[test]
    fn test_installation_key_does_not_collide_with_member() {
        let member = RawRecord::new(ObjectType::User, blob(json!({"id": 42, "login": "octocat"})))
            .with_id_from(&["id", "login"]);
        let installation = installation_key(
            RawRecord::new(ObjectType::Privilege, blob(json!({"id": 42}))).with_id_from(&["id"]),
        );

        assert_eq!(member.unique_id(), Some("42"));
        assert_eq!(installation.unique_id(), Some("installation:42"));
    }

    #[test]
    fn test_validate_config() {
        let connector = GithubConnector::new();
        assert!(connector
            .validate_config(&blob(json!({"github_token": "t", "organization": "acme"})))
            .is_ok());
        assert!(connector
            .validate_config(&blob(json!({"github_token": "t"})))
            .unwrap_err()
            .is_config_error());
        assert!(connector
            .validate_config(&blob(json!({"github_token": "t", "organization": " "})))
            .is_err());
    }
}
