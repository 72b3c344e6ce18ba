//! Connectors shipped with the service.

use sightline_connector::ConnectorRegistry;
use sightline_connector_aws::AwsConnector;
use sightline_connector_entra::EntraConnector;
use sightline_connector_ldap::AdConnector;
use sightline_connector_linux::LinuxConnector;
use sightline_connector_rest::{
    AzureConnector, GcpConnector, GithubConnector, SalesforceConnector, ServiceNowConnector,
};

/// Registry with every built-in connector.
#[must_use]
pub fn builtin_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry
        .register("ad", || Box::new(AdConnector::new()))
        .register("entraid", || Box::new(EntraConnector::entra_id()))
        .register("m365", || Box::new(EntraConnector::microsoft_365()))
        .register("aws", || Box::new(AwsConnector::new()))
        .register("gcp", || Box::new(GcpConnector::new()))
        .register("azure", || Box::new(AzureConnector::new()))
        .register("linux", || Box::new(LinuxConnector::new()))
        .register("github", || Box::new(GithubConnector::new()))
        .register("salesforce", || Box::new(SalesforceConnector::new()))
        .register("servicenow", || Box::new(ServiceNowConnector::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_names() {
        assert_eq!(
            builtin_registry().names(),
            vec![
                "ad",
                "aws",
                "azure",
                "entraid",
                "gcp",
                "github",
                "linux",
                "m365",
                "salesforce",
                "servicenow"
            ]
        );
    }

    #[test]
    fn test_sample_config_validates() {
        let raw = include_str!("../../../config/discovery.yml");
        let config = crate::DiscoveryConfig::from_yaml(raw, "config/discovery.yml").unwrap();
        let registry = builtin_registry();

        for (_, section) in config.sections() {
            for (name, entry) in section {
                let connector = registry.create(name).unwrap();
                let blob = entry.config.as_ref().unwrap();
                connector
                    .validate_config(blob)
                    .unwrap_or_else(|e| panic!("{name}: {e}"));
            }
        }
    }

    #[test]
    fn test_factories_match_names() {
        let registry = builtin_registry();
        for name in registry.names() {
            let connector = registry.create(&name).unwrap();
            assert_eq!(connector.name(), name);
        }
    }
}
