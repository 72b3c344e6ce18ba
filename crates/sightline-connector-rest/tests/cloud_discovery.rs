//! GCP and Azure connector tests against mock cloud APIs.
//!
//! Run with: cargo test -p sightline-connector-rest --features integration

#![cfg(feature = "integration")]

mod common;

use common::*;
use serde_json::json;
use sightline_connector::prelude::*;
use sightline_connector_rest::{AzureConnector, GcpConnector};
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIVATE_KEY: &str = include_str!("fixtures/service-account.pem");

// =============================================================================
// GCP
// =============================================================================

fn gcp_config(server: &MockServer) -> ConfigBlob {
    config(json!({
        "project": "prod-1234",
        "client_email": "discovery@prod-1234.iam.gserviceaccount.com",
        "private_key": PRIVATE_KEY,
        "token_uri": format!("{}/token", server.uri()),
        "iam_endpoint": server.uri(),
        "asset_endpoint": server.uri(),
        "page_size": 2
    }))
}

async fn mount_jwt_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.test",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_gcp_service_accounts_and_roles_follow_page_tokens() {
    let server = MockServer::start().await;
    mount_jwt_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/prod-1234/serviceAccounts"))
        .and(query_param("pageSize", "2"))
        .and(query_param_is_missing("pageToken"))
        .and(header("authorization", "Bearer ya29.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accounts": [
                {"uniqueId": "101", "email": "a@prod-1234.iam.gserviceaccount.com"},
                {"uniqueId": "102", "email": "b@prod-1234.iam.gserviceaccount.com"}
            ],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/prod-1234/serviceAccounts"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accounts": [{"uniqueId": "103", "email": "c@prod-1234.iam.gserviceaccount.com"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/prod-1234/roles"))
        .and(query_param("view", "FULL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roles": [{"name": "projects/prod-1234/roles/auditor", "title": "Auditor"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = gcp_config(&server);
    let connector = initialized(GcpConnector::new(), &config).await;
    let records = connector.fetch_identities(&Scope::single(config)).await.unwrap();

    assert_eq!(
        ids(&records),
        vec!["101", "102", "103", "projects/prod-1234/roles/auditor"]
    );
    assert_eq!(records[0].object_type, ObjectType::ServiceAccount);
    assert_eq!(records[3].object_type, ObjectType::Role);
}

#[tokio::test]
async fn test_gcp_assets_filtered_by_type() {
    let server = MockServer::start().await;
    mount_jwt_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/prod-1234/assets"))
        .and(query_param("contentType", "RESOURCE"))
        .and(query_param("assetTypes", "storage.googleapis.com/Bucket"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "assets": [{
                "name": "//storage.googleapis.com/audit-logs",
                "assetType": "storage.googleapis.com/Bucket"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = gcp_config(&server);
    config.insert("asset_types".to_string(), json!(["storage.googleapis.com/Bucket"]));
    let connector = initialized(GcpConnector::new(), &config).await;
    let records = connector.fetch_resources(&Scope::single(config)).await.unwrap();

    assert_eq!(ids(&records), vec!["//storage.googleapis.com/audit-logs"]);
    assert_eq!(records[0].object_type, ObjectType::Resource);
}

#[tokio::test]
async fn test_gcp_rejected_key_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = gcp_config(&server);
    let connector = initialized(GcpConnector::new(), &config).await;
    let err = connector.fetch_identities(&Scope::single(config)).await.unwrap_err();

    assert!(matches!(err, ConnectorError::AuthenticationFailed { .. }));
}

// =============================================================================
// Azure
// =============================================================================

const GRAPH_PATH: &str = "/providers/Microsoft.ResourceGraph/resources";

fn azure_config(server: &MockServer) -> ConfigBlob {
    config(json!({
        "tenant_id": "contoso",
        "client_id": "app",
        "client_secret": "secret",
        "login_endpoint": server.uri(),
        "management_endpoint": server.uri(),
        "page_size": 2,
        "subscriptions": ["sub-1"]
    }))
}

#[tokio::test]
async fn test_azure_resource_graph_follows_skip_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "/contoso/oauth2/v2.0/token", "arm-token").await;

    Mock::given(method("POST"))
        .and(path(GRAPH_PATH))
        .and(query_param("api-version", "2022-10-01"))
        .and(body_partial_json(json!({"options": {"$skipToken": "tok-2"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Sql/servers/db"}]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GRAPH_PATH))
        .and(header("authorization", "Bearer arm-token"))
        .and(body_partial_json(json!({
            "subscriptions": ["sub-1"],
            "options": {"$top": 2}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/a"},
                {"id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm"}
            ],
            "$skipToken": "tok-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = azure_config(&server);
    let connector = initialized(AzureConnector::new(), &config).await;
    let scope = expand_scopes(&config).unwrap().remove(0);
    assert_eq!(scope.label, "sub-1");
    let records = connector.fetch_resources(&scope).await.unwrap();

    assert_eq!(records.len(), 3);
    assert!(ids(&records)[2].ends_with("/servers/db"));
}

#[tokio::test]
async fn test_azure_throttling_waits_instead_of_failing() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "/contoso/oauth2/v2.0/token", "arm-token").await;

    Mock::given(method("POST"))
        .and(path(GRAPH_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GRAPH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "/x"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let config = azure_config(&server);
    let connector = initialized(AzureConnector::new(), &config).await;
    let scope = expand_scopes(&config).unwrap().remove(0);
    let records = connector.fetch_resources(&scope).await.unwrap();

    assert_eq!(ids(&records), vec!["/x"]);
}
