//! Shared fixtures for Graph connector integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use sightline_connector::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "contoso";

/// Scope config pointing both Graph and the login endpoint at `server`.
pub fn graph_config(server: &MockServer, extra: Value) -> ConfigBlob {
    let mut config = json!({
        "tenant_id": TENANT,
        "client_id": "app-id",
        "client_secret": "app-secret",
        "page_size": 2,
        "api_endpoint": format!("{}/v1.0", server.uri()),
        "login_endpoint": server.uri(),
        "rate_limit_retry": {
            "max_attempts": 2,
            "base_delay": 0.001,
            "max_delay": 0.01,
            "max_rate_limit_wait": 0.01
        }
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut config, extra) {
        base.extend(extra);
    }
    match config {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Token endpoint answering every request with a one-hour token.
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "graph-token"
        })))
        .mount(server)
        .await;
}

pub async fn initialized<C: DiscoveryConnector>(mut connector: C, config: &ConfigBlob) -> C {
    connector.validate_config(config).unwrap();
    connector
        .initialize(config, &ConnectorContext::default())
        .await
        .unwrap();
    connector
}

/// Graph collection page.
pub fn odata_page(items: Value, next_link: Option<String>) -> Value {
    let mut page = json!({ "value": items });
    if let Some(next) = next_link {
        page["@odata.nextLink"] = Value::String(next);
    }
    page
}
