//! Integration tests for the SAS-issuing backends and lease configuration
//! read-back.

mod common;

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use common::stack;
use leasebound::errors::Error;
use leasebound::framework::Operation;
use serde_json::json;

fn query_params(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

#[tokio::test]
async fn test_storage_sas_expires_with_role_ttl() {
    let stack = stack();
    stack.configure_storage().await;
    stack
        .write(
            "azurestorage",
            "roles/logs",
            json!({"container": "logs", "blob": "app.log", "permissions": "r", "ttl": "15m"}),
        )
        .await;

    let before = Utc::now();
    let response = stack.read("azurestorage", "token/logs").await;

    assert_eq!(response.lease_duration, 900);
    assert!(!response.renewable);

    let uri = response.data["uri"].as_str().unwrap();
    let (base, query) = uri.split_once('?').unwrap();
    assert_eq!(base, "https://acct.blob.core.windows.net/logs/app.log");

    let params = query_params(query);
    assert!(!params["sig"].is_empty());
    assert_eq!(params["sr"], "b");
    assert_eq!(params["sp"], "r");

    let expiry = NaiveDateTime::parse_from_str(&params["se"], "%Y-%m-%dT%H:%M:%SZ")
        .unwrap()
        .and_utc();
    let offset = (expiry - before).num_seconds();
    assert!((895..=905).contains(&offset), "expiry offset was {offset}s");
}

#[tokio::test]
async fn test_storage_sas_expiry_bounded_by_backend_max_ttl() {
    let stack = stack();
    stack.configure_storage().await;
    stack.write("azurestorage", "config/lease", json!({"ttl": "5m", "ttl_max": "10m"})).await;
    stack
        .write("azurestorage", "roles/logs", json!({"container": "logs", "permissions": "r", "ttl": "15m"}))
        .await;

    let before = Utc::now();
    let response = stack.read("azurestorage", "token/logs").await;
    assert_eq!(response.lease_duration, 600);

    let uri = response.data["uri"].as_str().unwrap();
    let params = query_params(uri.split_once('?').unwrap().1);
    let expiry = NaiveDateTime::parse_from_str(&params["se"], "%Y-%m-%dT%H:%M:%SZ")
        .unwrap()
        .and_utc();
    let offset = (expiry - before).num_seconds();
    assert!((595..=605).contains(&offset), "expiry offset was {offset}s");
}

#[tokio::test]
async fn test_storage_resource_uri_overrides_endpoint() {
    let stack = stack();
    stack.configure_storage().await;
    stack.write("azurestorage", "config/resource", json!({"uri": "https://cdn.example.com/"})).await;
    stack.write("azurestorage", "roles/media", json!({"container": "media", "permissions": "rl"})).await;

    let response = stack.read("azurestorage", "token/media").await;
    let uri = response.data["uri"].as_str().unwrap();
    assert!(uri.starts_with("https://cdn.example.com/media?"));
    assert!(uri.contains("sr=c"));
    // no role ttl and no backend lease config
    assert_eq!(response.lease_duration, common::HOUR.as_secs());
}

#[tokio::test]
async fn test_sas_leases_cannot_be_renewed() {
    let stack = stack();
    stack.configure_storage().await;
    stack.write("azurestorage", "roles/logs", json!({"container": "logs", "permissions": "r"})).await;
    let lease_id = stack.read("azurestorage", "token/logs").await.lease_id;

    let err = stack.leases.renew(&lease_id, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    stack.leases.revoke(&lease_id).await.unwrap();
    assert!(stack.leases.lease_ids("azurestorage/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_service_bus_token_format() {
    let stack = stack();
    stack.configure_service_bus().await;
    stack
        .write(
            "azureservicebus",
            "roles/sender",
            json!({"sas_policy_name": "send", "sas_policy_key": "policy-key", "ttl": "30m"}),
        )
        .await;

    let before = Utc::now().timestamp();
    let response = stack.read("azureservicebus", "token/sender").await;
    assert_eq!(response.lease_duration, 1800);
    assert_eq!(response.data["uri"], "https://contoso.servicebus.windows.net/orders");

    let token = response.data["token"].as_str().unwrap();
    let fields = query_params(token.strip_prefix("SharedAccessSignature ").unwrap());
    assert_eq!(fields["sr"], "https://contoso.servicebus.windows.net/orders");
    assert_eq!(fields["skn"], "send");
    assert!(!fields["sig"].is_empty());
    let expiry: i64 = fields["se"].parse().unwrap();
    assert!((before + 1795..=before + 1805).contains(&expiry));

    // revoke is accepted even though the token cannot be recalled
    stack.leases.revoke(&response.lease_id).await.unwrap();
}

#[tokio::test]
async fn test_service_bus_expiry_bounded_by_backend_max_ttl() {
    let stack = stack();
    stack.configure_service_bus().await;
    stack.write("azureservicebus", "config/lease", json!({"ttl": "5m", "ttl_max": "10m"})).await;
    stack
        .write(
            "azureservicebus",
            "roles/sender",
            json!({"sas_policy_name": "send", "sas_policy_key": "policy-key", "ttl": "15m"}),
        )
        .await;

    let before = Utc::now().timestamp();
    let response = stack.read("azureservicebus", "token/sender").await;
    assert_eq!(response.lease_duration, 600);

    let token = response.data["token"].as_str().unwrap();
    let fields = query_params(token.strip_prefix("SharedAccessSignature ").unwrap());
    let expiry: i64 = fields["se"].parse().unwrap();
    assert!((before + 595..=before + 605).contains(&expiry));
}

#[tokio::test]
async fn test_service_bus_token_requires_resource() {
    let stack = stack();
    stack
        .write("azureservicebus", "roles/sender", json!({"sas_policy_name": "send", "sas_policy_key": "k"}))
        .await;

    let err = stack
        .leases
        .handle("azureservicebus", common::request(Operation::Read, "token/sender", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigurationMissing { .. }));
    assert!(stack.leases.lease_ids("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lease_config_reads_back_canonical_durations() {
    let stack = stack();
    for mount in ["azuresql", "azurestorage", "azureservicebus"] {
        stack.write(mount, "config/lease", json!({"ttl": "1h5m", "ttl_max": "24h"})).await;
        let response = stack.read(mount, "config/lease").await;
        assert_eq!(response.data["ttl"], "1h5m0s");
        assert_eq!(response.data["ttl_max"], "24h0m0s");
        assert!(response.lease_id.is_empty());
    }
}
