//! OAuth2 token endpoint exchanges.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{RequestAuth, VendorHttp};
use crate::token::{CredentialExchange, IssuedToken};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Grant presented to the token endpoint.
#[derive(Debug, Clone)]
pub enum OAuthGrant {
    ClientCredentials {
        client_id: String,
        client_secret: SecretString,
        scope: Option<String>,
    },
    Password {
        client_id: String,
        client_secret: SecretString,
        username: String,
        password: SecretString,
    },
}

/// Form-encoded OAuth2 token request.
#[derive(Debug, Clone)]
pub struct OAuthExchange {
    http: VendorHttp,
    token_url: String,
    grant: OAuthGrant,
}

impl OAuthExchange {
    pub fn new(http: VendorHttp, token_url: impl Into<String>, grant: OAuthGrant) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            grant,
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        match &self.grant {
            OAuthGrant::ClientCredentials {
                client_id,
                client_secret,
                scope,
            } => {
                let mut form = vec![
                    ("grant_type", "client_credentials".to_string()),
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.expose_secret().clone()),
                ];
                if let Some(scope) = scope {
                    form.push(("scope", scope.clone()));
                }
                form
            }
            OAuthGrant::Password {
                client_id,
                client_secret,
                username,
                password,
            } => vec![
                ("grant_type", "password".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.expose_secret().clone()),
                ("username", username.clone()),
                ("password", password.expose_secret().clone()),
            ],
        }
    }
}

#[async_trait]
impl CredentialExchange for OAuthExchange {
    async fn exchange(&self) -> ConnectorResult<IssuedToken> {
        debug!(token_url = %self.token_url, "Requesting access token");
        let response = self
            .http
            .post_form(&self.token_url, &self.form(), RequestAuth::None)
            .await
            .map_err(|e| ConnectorError::auth(format!("token request failed: {e}")))?;
        parse_token_response(&response.body)
    }
}

/// Read `access_token` and `expires_in` from a token endpoint body.
///
/// `expires_in` may be a number or a numeric string.
pub fn parse_token_response(body: &Value) -> ConnectorResult<IssuedToken> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ConnectorError::auth("token response has no access_token"))?;

    let expires_in = match body.get("expires_in") {
        Some(Value::Number(n)) => n.as_u64().map(Duration::from_secs),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok().map(Duration::from_secs),
        _ => None,
    }
    .unwrap_or(DEFAULT_TOKEN_TTL);

    Ok(IssuedToken {
        access_token: SecretString::new(access_token.to_string()),
        expires_in: Some(expires_in),
    })
}
