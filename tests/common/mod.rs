//! Common test utilities for all integration tests.
//!
//! Builds a [`LeaseManager`] with all three backends mounted, the SQL and
//! firewall clients replaced by the in-memory fakes from `leasebound::testing`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use leasebound::backends::{AzureServiceBusBackend, AzureSqlBackend, AzureStorageBackend};
use leasebound::framework::{Operation, Request};
use leasebound::leases::{LeaseManager, LeasedResponse};
use leasebound::secrets::LeaseLimits;
use leasebound::storage::MemoryStorage;
use leasebound::testing::{
    FakeFirewallClient, FakeFirewallConnector, FakeSqlClient, FakeSqlConnector,
};
use serde_json::Value;

pub const HOUR: Duration = Duration::from_secs(3600);

pub const ROLE_SQL: &str =
    "CREATE USER [{{name}}] WITH PASSWORD = '{{password}}';\nGRANT SELECT ON SCHEMA::app TO [{{name}}];";

pub struct Stack {
    pub leases: Arc<LeaseManager>,
    pub storage: Arc<MemoryStorage>,
    pub db: Arc<FakeSqlClient>,
    pub firewall: Arc<FakeFirewallClient>,
}

pub fn limits() -> LeaseLimits {
    LeaseLimits { default_ttl: HOUR, max_ttl: 24 * HOUR }
}

pub fn account_key() -> String {
    STANDARD.encode("integration-account-key")
}

pub fn stack_with_limits(limits: LeaseLimits) -> Stack {
    let storage = Arc::new(MemoryStorage::new());
    let db = Arc::new(FakeSqlClient::new());
    let firewall = Arc::new(FakeFirewallClient::new());

    let sql = AzureSqlBackend::with_connectors(
        limits,
        Arc::new(FakeSqlConnector::new(db.clone())),
        Arc::new(FakeFirewallConnector::new(firewall.clone())),
    )
    .expect("azuresql backend");

    let mut leases = LeaseManager::new(storage.clone(), limits);
    leases.mount("azuresql", Arc::new(sql)).expect("mount azuresql");
    leases
        .mount("azurestorage", Arc::new(AzureStorageBackend::new(limits).expect("azurestorage backend")))
        .expect("mount azurestorage");
    leases
        .mount(
            "azureservicebus",
            Arc::new(AzureServiceBusBackend::new(limits).expect("azureservicebus backend")),
        )
        .expect("mount azureservicebus");

    Stack { leases: Arc::new(leases), storage, db, firewall }
}

pub fn stack() -> Stack {
    stack_with_limits(limits())
}

pub fn request(operation: Operation, path: &str, body: Value) -> Request {
    Request::new(operation, path).with_data(body.as_object().cloned().unwrap_or_default())
}

impl Stack {
    pub async fn write(&self, mount: &str, path: &str, body: Value) {
        self.leases
            .handle(mount, request(Operation::Update, path, body))
            .await
            .unwrap_or_else(|e| panic!("write {}/{} failed: {}", mount, path, e));
    }

    pub async fn read(&self, mount: &str, path: &str) -> LeasedResponse {
        self.leases
            .handle(mount, request(Operation::Read, path, Value::Null))
            .await
            .unwrap_or_else(|e| panic!("read {}/{} failed: {}", mount, path, e))
            .unwrap_or_else(|| panic!("read {}/{} returned nothing", mount, path))
    }

    pub async fn configure_sql(&self) {
        self.write(
            "azuresql",
            "config/connection",
            serde_json::json!({"connection_url": "server=tcp:db.example.net;user id=admin;password=x"}),
        )
        .await;
        self.write("azuresql", "roles/reader", serde_json::json!({"sql": ROLE_SQL})).await;
    }

    pub async fn configure_subscription(&self) {
        self.write(
            "azuresql",
            "config/subscription",
            serde_json::json!({"subscription_id": "sub-1", "management_cert": "cert", "server": "sqlsrv"}),
        )
        .await;
    }

    pub async fn configure_storage(&self) {
        self.write(
            "azurestorage",
            "config/account",
            serde_json::json!({"account_name": "acct", "account_key": account_key(), "verify": false}),
        )
        .await;
    }

    pub async fn configure_service_bus(&self) {
        self.write(
            "azureservicebus",
            "config/resource",
            serde_json::json!({"name": "orders", "namespace": "contoso"}),
        )
        .await;
    }
}
