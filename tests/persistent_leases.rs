//! Leases stored in SQLite survive a restart of the lease manager.

use std::sync::Arc;

use leasebound::backends::AzureSqlBackend;
use leasebound::config::DatabaseConfig;
use leasebound::framework::{Operation, Request};
use leasebound::leases::LeaseManager;
use leasebound::secrets::LeaseLimits;
use leasebound::storage::{create_pool, DbPool, SqlStorage};
use leasebound::testing::{
    FakeFirewallClient, FakeFirewallConnector, FakeSqlClient, FakeSqlConnector,
};
use serde_json::json;

async fn pool(dir: &tempfile::TempDir) -> DbPool {
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("leasebound.db").display()),
        max_connections: 2,
        auto_migrate: true,
        ..Default::default()
    };
    create_pool(&config).await.unwrap()
}

fn manager(pool: DbPool, db: Arc<FakeSqlClient>) -> LeaseManager {
    let limits = LeaseLimits::default();
    let backend = AzureSqlBackend::with_connectors(
        limits,
        Arc::new(FakeSqlConnector::new(db)),
        Arc::new(FakeFirewallConnector::new(Arc::new(FakeFirewallClient::new()))),
    )
    .unwrap();
    let mut manager = LeaseManager::new(Arc::new(SqlStorage::new(pool)), limits);
    manager.mount("azuresql", Arc::new(backend)).unwrap();
    manager
}

fn update(path: &str, body: serde_json::Value) -> Request {
    Request::new(Operation::Update, path).with_data(body.as_object().cloned().unwrap())
}

#[tokio::test]
async fn test_lease_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(&dir).await;

    let first_db = Arc::new(FakeSqlClient::new());
    let lease_id = {
        let manager = manager(pool.clone(), first_db.clone());
        manager
            .handle("azuresql", update("config/connection", json!({"connection_url": "server=db"})))
            .await
            .unwrap();
        manager
            .handle("azuresql", update("roles/web", json!({"sql": "CREATE USER [{{name}}]"})))
            .await
            .unwrap();
        let response = manager
            .handle("azuresql", Request::new(Operation::Read, "creds/web"))
            .await
            .unwrap()
            .unwrap();
        response.lease_id
    };

    // A fresh manager over the same database knows the lease and its login.
    let second_db = Arc::new(FakeSqlClient::new());
    let manager = manager(pool, second_db.clone());
    let info = manager.lookup(&lease_id).await.unwrap();
    assert!(info.renewable);

    manager.revoke(&lease_id).await.unwrap();
    let created = first_db.statements();
    let username = created[0]
        .strip_prefix("CREATE USER [")
        .and_then(|s| s.strip_suffix(']'))
        .unwrap()
        .to_string();
    assert!(second_db.statements().contains(&format!("DROP USER IF EXISTS [{}];", username)));
    assert!(manager.lease_ids("").await.unwrap().is_empty());
}
