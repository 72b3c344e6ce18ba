//! AWS connector settings and SDK configuration loading.

use aws_config::retry::RetryConfig;
use aws_config::{Region, SdkConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sightline_connector::prelude::*;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Settings for one region scope.
///
/// Credentials come from the standard AWS chain (environment, profile,
/// instance role) unless an explicit key pair is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsSettings {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<SecretString>,

    #[serde(default)]
    pub session_token: Option<SecretString>,

    /// Endpoint override, e.g. a LocalStack URL.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// `MaxItems` for IAM listings.
    #[serde(default = "default_iam_page_size")]
    pub iam_page_size: i32,

    /// `ResourcesPerPage` for the tagging API (at most 100).
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    #[serde(default)]
    pub rate_limit_retry: RetrySettings,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_iam_page_size() -> i32 {
    100
}

fn default_page_size() -> i32 {
    50
}

impl AwsSettings {
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.region.trim().is_empty() {
            return Err(ConnectorError::invalid_config("region must not be empty"));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConnectorError::invalid_config(
                "access_key_id and secret_access_key must be set together",
            ));
        }
        if !(1..=1000).contains(&self.iam_page_size) {
            return Err(ConnectorError::invalid_config("iam_page_size must be between 1 and 1000"));
        }
        if !(1..=100).contains(&self.page_size) {
            return Err(ConnectorError::invalid_config("page_size must be between 1 and 100"));
        }
        Ok(())
    }

    /// Load the SDK configuration for this scope's region.
    ///
    /// SDK-level retries are disabled; calls go through the connector's
    /// [`RetryPolicy`] instead.
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut builder = aws_config::from_env()
            .region(Region::new(self.region.clone()))
            .retry_config(RetryConfig::disabled());

        if let (Some(access_key), Some(secret_key)) = (&self.access_key_id, &self.secret_access_key) {
            let creds = aws_sdk_iam::config::Credentials::new(
                access_key,
                secret_key.expose_secret(),
                self.session_token
                    .as_ref()
                    .map(|t| t.expose_secret().clone()),
                None,
                "sightline-explicit",
            );
            builder = builder.credentials_provider(creds);
        }
        if let Some(endpoint) = &self.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        builder.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> AwsSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = parse(json!({}));
        assert_eq!(s.region, "us-east-1");
        assert_eq!(s.page_size, 50);
        assert_eq!(s.iam_page_size, 100);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let s = parse(json!({"access_key_id": "AKIA"}));
        assert!(s.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(parse(json!({"page_size": 101})).validate().is_err());
        assert!(parse(json!({"page_size": 0})).validate().is_err());
        assert!(parse(json!({"iam_page_size": 1001})).validate().is_err());
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let s = parse(json!({"access_key_id": "AKIA", "secret_access_key": "wJalr"}));
        assert!(!format!("{s:?}").contains("wJalr"));
    }
}
