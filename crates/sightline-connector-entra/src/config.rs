//! Graph connector settings.

use secrecy::SecretString;
use serde::Deserialize;
use sightline_connector::resilience::RetrySettings;

/// National cloud the tenant lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphCloud {
    #[default]
    Global,
    UsGovernment,
    China,
}

impl GraphCloud {
    #[must_use]
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            GraphCloud::Global => "https://login.microsoftonline.com",
            GraphCloud::UsGovernment => "https://login.microsoftonline.us",
            GraphCloud::China => "https://login.chinacloudapi.cn",
        }
    }

    #[must_use]
    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            GraphCloud::Global => "https://graph.microsoft.com",
            GraphCloud::UsGovernment => "https://graph.microsoft.us",
            GraphCloud::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }
}

/// `scope` may be a single string or a list of scopes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TokenScope {
    One(String),
    Many(Vec<String>),
}

impl TokenScope {
    fn joined(&self) -> String {
        match self {
            TokenScope::One(s) => s.clone(),
            TokenScope::Many(list) => list.join(" "),
        }
    }
}

/// Per-tenant settings, read from one scope's config.
///
/// ```yaml
/// tenant_id: 00000000-0000-0000-0000-000000000000
/// client_id: app-id
/// client_secret: ${ENTRA_CLIENT_SECRET}
/// page_size: 100
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub cloud: GraphCloud,
    /// Graph base URL including the API version.
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub login_endpoint: Option<String>,
    #[serde(default)]
    pub scope: Option<TokenScope>,
    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_page_size() -> u32 {
    100
}

impl GraphSettings {
    /// Graph base URL without a trailing slash, e.g. `https://graph.microsoft.com/v1.0`.
    #[must_use]
    pub fn api_base(&self) -> String {
        match &self.api_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("{}/v1.0", self.cloud.graph_endpoint()),
        }
    }

    #[must_use]
    pub fn token_url(&self) -> String {
        let login = self
            .login_endpoint
            .as_deref()
            .unwrap_or(self.cloud.login_endpoint())
            .trim_end_matches('/');
        format!("{login}/{}/oauth2/v2.0/token", self.tenant_id)
    }

    #[must_use]
    pub fn token_scope(&self) -> String {
        self.scope
            .as_ref()
            .map(TokenScope::joined)
            .unwrap_or_else(|| format!("{}/.default", self.cloud.graph_endpoint()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> GraphSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = settings(json!({
            "tenant_id": "contoso",
            "client_id": "app",
            "client_secret": "secret"
        }));
        assert_eq!(s.page_size, 100);
        assert_eq!(s.api_base(), "https://graph.microsoft.com/v1.0");
        assert_eq!(
            s.token_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(s.token_scope(), "https://graph.microsoft.com/.default");
    }

    #[test]
    fn test_overrides() {
        let s = settings(json!({
            "tenant_id": "contoso",
            "client_id": "app",
            "client_secret": "secret",
            "cloud": "us_government",
            "api_endpoint": "https://graph.example.test/beta/",
            "scope": ["a/.default", "b/.default"]
        }));
        assert_eq!(s.api_base(), "https://graph.example.test/beta");
        assert_eq!(
            s.token_url(),
            "https://login.microsoftonline.us/contoso/oauth2/v2.0/token"
        );
        assert_eq!(s.token_scope(), "a/.default b/.default");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let result: Result<GraphSettings, _> =
            serde_json::from_value(json!({"tenant_id": "contoso"}));
        assert!(result.is_err());
    }
}
