//! Google Cloud IAM and Cloud Asset Inventory discovery.
//!
//! One scope per project. Service accounts and custom roles come from the
//! IAM API, resources from the Cloud Asset `assets` listing. Every listing
//! pages through `nextPageToken`.
//!
//! Authentication is a service-account key traded for an access token with
//! a signed JWT assertion (RFC 7523).

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sightline_connector::oauth::parse_token_response;
use sightline_connector::prelude::*;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::{array_field, base_url, join, require_ctx, to_records, SaasClient};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// Service-account key, in the shape of a downloaded JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Settings for one GCP project.
///
/// ```yaml
/// projects: [prod-1234, staging-5678]
/// credentials_file: /etc/sightline/gcp-key.json
/// asset_types: [compute.googleapis.com/Instance, storage.googleapis.com/Bucket]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GcpSettings {
    #[serde(alias = "project_id")]
    pub project: String,

    /// Path to a service-account JSON key file.
    #[serde(default)]
    pub credentials_file: Option<String>,

    /// Inline alternative to `credentials_file`.
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key: Option<SecretString>,

    /// Overrides the key's `token_uri`.
    #[serde(default)]
    pub token_uri: Option<String>,

    #[serde(default = "default_iam_endpoint")]
    pub iam_endpoint: String,
    #[serde(default = "default_asset_endpoint")]
    pub asset_endpoint: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Cloud Asset types to list; empty lists every type.
    #[serde(default)]
    pub asset_types: Vec<String>,

    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_iam_endpoint() -> String {
    "https://iam.googleapis.com/".to_string()
}

fn default_asset_endpoint() -> String {
    "https://cloudasset.googleapis.com/".to_string()
}

fn default_page_size() -> u32 {
    100
}

impl GcpSettings {
    /// Check the credential settings without reading any file.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.project.trim().is_empty() {
            return Err(ConnectorError::invalid_config("project is required"));
        }
        if self.credentials_file.is_none() && (self.client_email.is_none() || self.private_key.is_none()) {
            return Err(ConnectorError::invalid_config(
                "credentials_file, or client_email with private_key, is required",
            ));
        }
        if self.page_size == 0 {
            return Err(ConnectorError::invalid_config("page_size must be positive"));
        }
        base_url("iam_endpoint", &self.iam_endpoint)?;
        base_url("asset_endpoint", &self.asset_endpoint)?;
        Ok(())
    }

    /// The service-account key, loading `credentials_file` when set.
    pub fn service_account(&self) -> ConnectorResult<ServiceAccountKey> {
        let mut key = match (&self.credentials_file, &self.client_email, &self.private_key) {
            (Some(path), _, _) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ConnectorError::invalid_config(format!("cannot read credentials_file '{path}': {e}"))
                })?;
                serde_json::from_str::<ServiceAccountKey>(&raw).map_err(|e| {
                    ConnectorError::invalid_config(format!(
                        "credentials_file '{path}' is not a service-account key: {e}"
                    ))
                })?
            }
            (None, Some(client_email), Some(private_key)) => ServiceAccountKey {
                client_email: client_email.clone(),
                private_key: private_key.clone(),
                token_uri: default_token_uri(),
            },
            _ => {
                return Err(ConnectorError::invalid_config(
                    "credentials_file, or client_email with private_key, is required",
                ))
            }
        };
        if let Some(token_uri) = &self.token_uri {
            key.token_uri = token_uri.clone();
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// JWT-bearer grant signed with a service-account key.
pub struct JwtBearerExchange {
    http: VendorHttp,
    key: ServiceAccountKey,
    scope: String,
    signing_key: EncodingKey,
}

impl fmt::Debug for JwtBearerExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtBearerExchange")
            .field("client_email", &self.key.client_email)
            .field("token_uri", &self.key.token_uri)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl JwtBearerExchange {
    pub fn new(http: VendorHttp, key: ServiceAccountKey, scope: impl Into<String>) -> ConnectorResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())
            .map_err(|e| {
                ConnectorError::invalid_config(format!(
                    "private key for {} is not an RSA PEM key: {e}",
                    key.client_email
                ))
            })?;
        Ok(Self {
            http,
            key,
            scope: scope.into(),
            signing_key,
        })
    }

    fn assertion(&self) -> ConnectorResult<String> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ConnectorError::internal(format!("system clock before epoch: {e}")))?
            .as_secs();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| ConnectorError::auth(format!("cannot sign token assertion: {e}")))
    }
}

#[async_trait]
impl CredentialExchange for JwtBearerExchange {
    async fn exchange(&self) -> ConnectorResult<IssuedToken> {
        debug!(client_email = %self.key.client_email, "Requesting GCP access token");
        let form = [
            ("grant_type", JWT_BEARER_GRANT.to_string()),
            ("assertion", self.assertion()?),
        ];
        let response = self
            .http
            .post_form(&self.key.token_uri, &form, RequestAuth::None)
            .await
            .map_err(|e| ConnectorError::auth(format!("token request failed: {e}")))?;
        parse_token_response(&response.body)
    }
}

/// GCP connector, registered as `gcp`.
///
/// Neither listing filters on modification time, so a watermark is ignored.
#[derive(Debug, Default)]
pub struct GcpConnector {
    ctx: Option<ConnectorContext>,
}

impl GcpConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn settings(scope: &Scope) -> ConnectorResult<GcpSettings> {
        if let Some(wm) = scope.watermark() {
            debug!(last_run = wm.raw(), "GCP listings have no modification filter, watermark ignored");
        }
        let settings: GcpSettings = scope.settings()?;
        settings.validate()?;
        Ok(settings)
    }

    fn client(&self, settings: &GcpSettings) -> ConnectorResult<SaasClient> {
        let ctx = require_ctx(self.name(), &self.ctx)?;
        let retry = &settings.rate_limit_retry;
        let key = settings.service_account()?;
        let cache_key = format!("gcp:{}", key.client_email);
        let exchange = JwtBearerExchange::new(
            ctx.http
                .with_policies(retry.retry_policy(), retry.rate_limit_policy()),
            key,
            CLOUD_PLATFORM_SCOPE,
        )?;
        Ok(SaasClient::new(ctx, retry, cache_key, Box::new(exchange)))
    }

    /// Every page of `url` through `nextPageToken`.
    async fn list(
        client: &SaasClient,
        url: &str,
        items_key: &str,
        query: Vec<(&'static str, String)>,
    ) -> ConnectorResult<Vec<Value>> {
        collect_pages(None, |cursor| {
            let mut query = query.clone();
            if let Some(PageCursor::Token(token)) = cursor {
                query.push(("pageToken", token));
            }
            async move {
                let body = client.get(url, &query).await?.body;
                let next = body
                    .get("nextPageToken")
                    .and_then(Value::as_str)
                    .map(|t| PageCursor::Token(t.to_string()));
                Ok::<_, ConnectorError>(Page::new(array_field(&body, items_key)?, next))
            }
        })
        .await
    }
}

fn project_path(base: &Url, project: &str, collection: &str) -> ConnectorResult<String> {
    join(base, &format!("v1/projects/{project}/{collection}"))
}

#[async_trait]
impl DiscoveryConnector for GcpConnector {
    fn name(&self) -> &str {
        "gcp"
    }

    fn validate_config(&self, config: &ConfigBlob) -> ConnectorResult<()> {
        for scope in expand_scopes(config)? {
            scope
                .settings::<GcpSettings>()
                .and_then(|settings| settings.validate())
                .map_err(|e| ConnectorError::invalid_config(format!("project '{}': {e}", scope.label)))?;
        }
        Ok(())
    }

    async fn initialize(&mut self, _config: &ConfigBlob, ctx: &ConnectorContext) -> ConnectorResult<()> {
        self.ctx = Some(ctx.clone());
        info!(connector = self.name(), "GCP connector initialized");
        Ok(())
    }

    #[instrument(skip(self, scope), fields(connector = "gcp", project = %scope.label))]
    async fn fetch_identities(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings = Self::settings(scope)?;
        let client = self.client(&settings)?;
        let iam = base_url("iam_endpoint", &settings.iam_endpoint)?;
        let page_size = ("pageSize", settings.page_size.to_string());

        let accounts = Self::list(
            &client,
            &project_path(&iam, &settings.project, "serviceAccounts")?,
            "accounts",
            vec![page_size.clone()],
        )
        .await?;
        let roles = Self::list(
            &client,
            &project_path(&iam, &settings.project, "roles")?,
            "roles",
            vec![page_size, ("view", "FULL".to_string())],
        )
        .await?;

        info!(
            accounts = accounts.len(),
            roles = roles.len(),
            "GCP IAM identities fetched"
        );
        let mut records = to_records(ObjectType::ServiceAccount, accounts, &["uniqueId", "email", "name"])?;
        records.extend(to_records(ObjectType::Role, roles, &["name"])?);
        Ok(records)
    }

    #[instrument(skip(self, scope), fields(connector = "gcp", project = %scope.label))]
    async fn fetch_resources(&self, scope: &Scope) -> ConnectorResult<Vec<RawRecord>> {
        let settings = Self::settings(scope)?;
        let client = self.client(&settings)?;
        let assets_url = project_path(
            &base_url("asset_endpoint", &settings.asset_endpoint)?,
            &settings.project,
            "assets",
        )?;

        let mut query = vec![
            ("contentType", "RESOURCE".to_string()),
            ("pageSize", settings.page_size.to_string()),
        ];
        query.extend(settings.asset_types.iter().map(|t| ("assetTypes", t.clone())));

        let assets = Self::list(&client, &assets_url, "assets", query).await?;
        info!(count = assets.len(), "GCP assets fetched");
        to_records(ObjectType::Resource, assets, &["name"])
    }

    fn scope_tag(&self) -> Option<&'static str> {
        Some("project")
    }

    fn concurrency_key(&self) -> Option<&'static str> {
        Some("max_workers")
    }
}
