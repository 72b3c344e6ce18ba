//! Shared fixtures for SaaS connector integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use sightline_connector::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config block from a JSON object, with millisecond retry settings.
pub fn config(value: Value) -> ConfigBlob {
    let mut value = value;
    value["rate_limit_retry"] = json!({
        "max_attempts": 2,
        "base_delay": 0.001,
        "max_delay": 0.01,
        "max_rate_limit_waits": 3,
        "max_rate_limit_wait": 0.01
    });
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

pub async fn initialized<C: DiscoveryConnector>(mut connector: C, config: &ConfigBlob) -> C {
    connector.validate_config(config).unwrap();
    connector
        .initialize(config, &ConnectorContext::default())
        .await
        .unwrap();
    connector
}

/// OAuth token endpoint at `token_path` issuing `token`.
pub async fn mount_token_endpoint(server: &MockServer, token_path: &str, token: &str) {
    Mock::given(method("POST"))
        .and(path(token_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 1799
        })))
        .mount(server)
        .await;
}

pub fn ids(records: &[RawRecord]) -> Vec<&str> {
    records.iter().filter_map(RawRecord::unique_id).collect()
}
