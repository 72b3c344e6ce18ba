//! Active Directory connection settings.

use secrecy::SecretString;
use serde::Deserialize;
use sightline_connector::prelude::*;

/// Settings for one AD domain, parsed from a scope config.
///
/// ```yaml
/// domains:
///   - server: ldaps://dc1.example.com
///     user: CN=svc-discovery,CN=Users,DC=example,DC=com
///     password: ${AD_PASSWORD}
///     base_dn: DC=example,DC=com
///     page_size: 500
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AdSettings {
    /// `ldap://` or `ldaps://` URL of a domain controller.
    pub server: String,

    /// Bind DN.
    pub user: String,

    pub password: SecretString,

    /// Search base for every query.
    pub base_dn: String,

    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Attributes requested for user objects.
    #[serde(default = "default_user_attributes")]
    pub attributes: Vec<String>,

    /// Attributes requested for computer objects.
    #[serde(default = "default_computer_attributes")]
    pub computer_attributes: Vec<String>,

    /// Object classes discovered as resources.
    #[serde(default = "default_resource_classes")]
    pub resource_classes: Vec<String>,

    #[serde(default = "default_resource_attributes")]
    pub resource_attributes: Vec<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upgrade a plain `ldap://` connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,

    /// Skip server certificate verification.
    #[serde(default)]
    pub no_tls_verify: bool,

    /// Retry budget for connects and search pages.
    #[serde(default, alias = "retry")]
    pub rate_limit_retry: RetrySettings,
}

fn default_page_size() -> i32 {
    1000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_user_attributes() -> Vec<String> {
    to_strings(&[
        "sAMAccountName",
        "displayName",
        "mail",
        "userAccountControl",
        "whenCreated",
        "whenChanged",
        "objectGUID",
        "distinguishedName",
        "memberOf",
        "userPrincipalName",
        "lastLogonTimestamp",
    ])
}

fn default_computer_attributes() -> Vec<String> {
    to_strings(&[
        "sAMAccountName",
        "dNSHostName",
        "operatingSystem",
        "operatingSystemVersion",
        "userAccountControl",
        "whenCreated",
        "whenChanged",
        "objectGUID",
        "distinguishedName",
    ])
}

fn default_resource_classes() -> Vec<String> {
    to_strings(&["volume", "printQueue", "msExchResource", "groupPolicyContainer"])
}

fn default_resource_attributes() -> Vec<String> {
    to_strings(&[
        "cn",
        "objectClass",
        "distinguishedName",
        "description",
        "uNCName",
        "printerName",
        "serverName",
        "managedBy",
        "whenCreated",
        "whenChanged",
    ])
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

impl AdSettings {
    /// Check the settings that would otherwise only fail at bind time.
    pub fn validate(&self) -> ConnectorResult<()> {
        if !(self.server.starts_with("ldap://") || self.server.starts_with("ldaps://")) {
            return Err(ConnectorError::invalid_config(format!(
                "server must be an ldap:// or ldaps:// URL, got '{}'",
                self.server
            )));
        }
        if self.base_dn.trim().is_empty() {
            return Err(ConnectorError::invalid_config("base_dn is required"));
        }
        if self.page_size <= 0 {
            return Err(ConnectorError::invalid_config("page_size must be positive"));
        }
        if self.resource_classes.is_empty() {
            return Err(ConnectorError::invalid_config(
                "resource_classes must name at least one object class",
            ));
        }
        Ok(())
    }
}
