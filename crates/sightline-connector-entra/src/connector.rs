//! Entra ID and Microsoft 365 discovery connectors.

use serde_json::Value;
use sightline_connector::prelude::*;
use tracing::{debug, info, instrument};

use crate::config::GraphSettings;
use crate::graph::GraphClient;

/// Which Graph collections a connector reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphProfile {
    /// Users, directory roles and applications.
    EntraId,
    /// Users only.
    Microsoft365,
}

impl GraphProfile {
    #[must_use]
    pub fn connector_name(&self) -> &'static str {
        match self {
            GraphProfile::EntraId => "entraid",
            GraphProfile::Microsoft365 => "m365",
        }
    }
}

/// Graph-backed discovery connector.
///
/// Scopes fan out over `tenants`; every tenant carries its own
/// credentials and gets its own cached token.
#[derive(Debug)]
pub struct EntraConnector {
    profile: GraphProfile,
    ctx: Option<ConnectorContext>,
}

impl EntraConnector {
    #[must_use]
    pub fn new(profile: GraphProfile) -> Self {
        Self { profile, ctx: None }
    }

    #[must_use]
    pub fn entra_id() -> Self {
        Self::new(GraphProfile::EntraId)
    }

    #[must_use]
    pub fn microsoft_365() -> Self {
        Self::new(GraphProfile::Microsoft365)
    }

    fn client(&self, scope: &Scope) -> ConnectorResult<GraphClient> {
        let ctx = self.ctx.as_ref().ok_or_else(|| ConnectorError::NotInitialized {
            connector: self.name().to_string(),
        })?;
        let settings: GraphSettings = scope.settings()?;
        Ok(GraphClient::new(&settings, ctx))
    }

    async fn list_users(&self, client: &GraphClient, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings: GraphSettings = scope.settings()?;
        let mut query = vec![("$top", settings.page_size.to_string())];
        if let Some(watermark) = scope.watermark() {
            query.push((
                "$filter",
                format!("lastModifiedDateTime gt {}", watermark.to_rfc3339()),
            ));
        }

        let users = client.list("users", &query).await?;
        to_records(ObjectType::User, users)
    }

    async fn list_roles(&self, client: &GraphClient) -> ConnectorResult<Vec<RawRecord>> {
        // directoryRoles supports neither $top nor a modification filter.
        let roles = client.list("directoryRoles", &[]).await?;
        to_records(ObjectType::Role, roles)
    }
}

fn to_records(object_type: ObjectType, items: Vec<Value>) -> ConnectorResult<Vec<RawRecord>> {
    items
        .into_iter()
        .map(|item| Ok(RawRecord::from_value(object_type, item)?.with_id_from(&["id"])))
        .collect()
}

#[async_trait]
impl DiscoveryConnector for EntraConnector {
    fn name(&self) -> &str {
        self.profile.connector_name()
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            scope.settings::<GraphSettings>().map_err(|e| {
                ConnectorError::invalid_config(format!("tenant '{}': {e}", scope.label))
            })?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "Graph connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = self.name(), tenant = %scope.label))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let client = self.client(scope)?;
        let mut records = self.list_users(&client, scope).await?;
        if self.profile == GraphProfile::EntraId {
            records.extend(self.list_roles(&client).await?);
        }
        debug!(count = records.len(), "Identities fetched");
        Ok(records)
    }

    #[instrument(skip(self, scope), fields(connector = self.name(), tenant = %scope.label))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        if self.profile != GraphProfile::EntraId {
            return Err(ConnectorError::unsupported(format!("{}: fetch_resources", self.name())));
        }
        let client = self.client(scope)?;
        let settings: GraphSettings = scope.settings()?;
        let mut query = vec![("$top", settings.page_size.to_string())];
        if let Some(watermark) = scope.watermark() {
            query.push((
                "$filter",
                format!("createdDateTime ge {}", watermark.to_rfc3339()),
            ));
        }

        let applications = client.list("applications", &query).await?;
        to_records(ObjectType::Resource, applications)
    }

    fn scope_tag(&self) -> Option<&'static str> {
        Some("tenant")
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
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
    fn test_names() {
        assert_eq!(EntraConnector::entra_id().name(), "entraid");
        assert_eq!(EntraConnector::microsoft_365().name(), "m365");
    }

    #[test]
    fn test_validate_each_tenant() {
        let connector = EntraConnector::entra_id();
        let good = blob(json!({
            "client_id": "app",
            "client_secret": "s",
            "tenants": [{"tenant_id": "a"}, {"tenant_id": "b"}]
        }));
        assert!(connector.validate_config(&good).is_ok());

        let bad = blob(json!({
            "tenants": [{"tenant_id": "a", "client_id": "app", "client_secret": "s"}, {"tenant_id": "b"}]
        }));
        let err = connector.validate_config(&bad).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("'b'"));
    }

    #[tokio::test]
    async fn test_fetch_before_initialize() {
        let connector = EntraConnector::entra_id();
        let scope = Scope::single(blob(json!({
            "tenant_id": "a", "client_id": "app", "client_secret": "s"
        })));
        let err = connector.fetch_identities(&scope).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn test_m365_has_no_resources() {
        let mut connector = EntraConnector::microsoft_365();
        connector
            .initialize(&ConfigBlob::new(), &ConnectorContext::default())
            .await
            .unwrap();
        let scope = Scope::single(blob(json!({
            "tenant_id": "a", "client_id": "app", "client_secret": "s"
        })));
        let err = connector.fetch_resources(&scope).await.unwrap_err();
        assert!(err.is_unsupported());
    }
}
