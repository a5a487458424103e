//! # Azure Service Bus Backend
//!
//! Issues SAS tokens for a Service Bus entity (queue, topic, relay or Event
//! Hub) signed with a shared access policy key held by the role.
//!
//! Tokens cannot be withdrawn before their `se` expiry without rotating the
//! policy key, so revoking a lease only releases the bookkeeping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::sas::{encode_component, SasSigner, SharedKeySigner};
use super::{lease_path, BackendType, LogicalBackend};
use crate::errors::{Error, Result};
use crate::framework::{generic_name_regex, FieldData, FieldSchema, Operation, Request, Response, Router};
use crate::secrets::duration::{canonical, format_duration};
use crate::secrets::{bounded_ttl, IssuedSecret, LeaseLimits, LeaseTerms, RoleRegistry, SecretString};
use crate::storage::config_store::{
    read_config, read_lease_config, require_config, write_config, ResourceConfig, RESOURCE_KEY,
};
use crate::storage::Storage;

pub const SECRET_TYPE: &str = "token";

/// Shared access policy used to sign tokens for a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBusRole {
    pub sas_policy_name: String,
    pub sas_policy_key: SecretString,
    #[serde(with = "canonical", default)]
    pub ttl: Duration,
}

/// `https://<namespace>.servicebus.windows.net/<name>`
pub fn resource_uri(namespace: &str, name: &str) -> String {
    format!("https://{}.servicebus.windows.net/{}", namespace, name)
}

/// Build a `SharedAccessSignature` token for `uri` expiring at `expiry` (unix seconds).
pub fn sas_token(uri: &str, policy_name: &str, signer: &dyn SasSigner, expiry: i64) -> Result<String> {
    let encoded_uri = encode_component(uri);
    let signature = signer.sign(&format!("{}\n{}", encoded_uri, expiry))?;
    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        encode_component(&signature),
        expiry,
        policy_name
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceBusPath {
    ReadResource,
    WriteResource,
    ReadLease,
    WriteLease,
    ListRoles,
    ReadRole,
    WriteRole,
    DeleteRole,
    Token,
}

pub struct AzureServiceBusBackend {
    router: Router<ServiceBusPath>,
    roles: RoleRegistry<ServiceBusRole>,
    limits: LeaseLimits,
}

impl std::fmt::Debug for AzureServiceBusBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureServiceBusBackend").field("limits", &self.limits).finish()
    }
}

impl AzureServiceBusBackend {
    pub fn new(limits: LeaseLimits) -> Result<Self> {
        Ok(Self { router: build_router()?, roles: RoleRegistry::new(), limits })
    }

    async fn read_resource(&self, storage: &dyn Storage) -> Result<Option<Response>> {
        let Some(resource) = read_config::<ResourceConfig>(storage, RESOURCE_KEY).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("uri".into(), Value::from(resource.uri));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_resource(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let uri = resource_uri(fields.get_str("namespace"), fields.get_str("name"));
        url::Url::parse(&uri)
            .map_err(|e| Error::validation(format!("invalid Service Bus resource '{}': {}", uri, e)))?;
        write_config(storage, RESOURCE_KEY, &ResourceConfig { uri }).await?;
        Ok(None)
    }

    async fn read_role(&self, storage: &dyn Storage, name: &str) -> Result<Option<Response>> {
        let Some(role) = self.roles.read(storage, name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("sas_policy_name".into(), Value::from(role.sas_policy_name));
        data.insert("ttl".into(), Value::from(format_duration(role.ttl)));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_role(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let role = ServiceBusRole {
            sas_policy_name: fields.get_str("sas_policy_name").to_string(),
            sas_policy_key: SecretString::new(fields.get_str("sas_policy_key")),
            ttl: fields.get_duration("ttl").unwrap_or_default(),
        };
        self.roles.write(storage, fields.get_str("name"), &role).await?;
        Ok(None)
    }

    #[instrument(skip(self, storage), fields(role = %name))]
    async fn issue_token(&self, storage: &dyn Storage, name: &str) -> Result<Option<Response>> {
        let role = self.roles.require(storage, name).await?;
        let resource: ResourceConfig = require_config(storage, RESOURCE_KEY).await?;
        let lease = read_lease_config(storage).await?;
        let ttl = bounded_ttl(Some(role.ttl), lease.as_ref(), &self.limits);

        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| Error::validation(format!("ttl out of range: {}", format_duration(ttl))))?;
        let expiry = Utc::now().timestamp() + ttl_secs;

        let signer = SharedKeySigner::from_raw(&role.sas_policy_key);
        let token = sas_token(&resource.uri, &role.sas_policy_name, &signer, expiry)?;
        debug!(uri = %resource.uri, policy = %role.sas_policy_name, expiry, "SAS token issued");

        let secret = IssuedSecret::new(SECRET_TYPE)
            .with_data("token", token)
            .with_data("policy_name", role.sas_policy_name.as_str())
            .with_data("uri", resource.uri.as_str())
            .with_internal("uri", resource.uri.as_str())
            .with_ttl(ttl)
            .non_renewable();
        Ok(Some(Response::with_secret(secret)))
    }
}

fn build_router() -> Result<Router<ServiceBusPath>> {
    Router::new()
        .path(
            "config/resource",
            vec![
                FieldSchema::string("name", "Name of the queue, topic, relay or Event Hub").required(),
                FieldSchema::string("namespace", "Service Bus namespace").required(),
            ],
            vec![
                (Operation::Read, ServiceBusPath::ReadResource),
                (Operation::Update, ServiceBusPath::WriteResource),
            ],
        )?
        .path(
            lease_path::PATTERN,
            lease_path::fields(),
            vec![
                (Operation::Read, ServiceBusPath::ReadLease),
                (Operation::Update, ServiceBusPath::WriteLease),
            ],
        )?
        .path("roles/?", vec![], vec![(Operation::List, ServiceBusPath::ListRoles)])?
        .path(
            &format!("roles/{}", generic_name_regex("name")),
            vec![
                FieldSchema::string("name", "Name of the role"),
                FieldSchema::string("sas_policy_name", "Shared access policy name").required(),
                FieldSchema::string("sas_policy_key", "Shared access policy key").required(),
                FieldSchema::duration("ttl", "Lease time of the role"),
            ],
            vec![
                (Operation::Read, ServiceBusPath::ReadRole),
                (Operation::Update, ServiceBusPath::WriteRole),
                (Operation::Delete, ServiceBusPath::DeleteRole),
            ],
        )?
        .path(
            &format!("token/{}", generic_name_regex("name")),
            vec![FieldSchema::string("name", "Name of the role")],
            vec![(Operation::Read, ServiceBusPath::Token)],
        )
}

#[async_trait]
impl LogicalBackend for AzureServiceBusBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::AzureServiceBus
    }

    #[instrument(skip(self, storage, request), fields(operation = %request.operation, path = %request.path))]
    async fn handle_request(&self, storage: &dyn Storage, request: Request) -> Result<Option<Response>> {
        let (path, fields) = self.router.route(&request)?;
        match path {
            ServiceBusPath::ReadResource => self.read_resource(storage).await,
            ServiceBusPath::WriteResource => self.write_resource(storage, &fields).await,
            ServiceBusPath::ReadLease => lease_path::read(storage).await,
            ServiceBusPath::WriteLease => lease_path::write(storage, &fields).await,
            ServiceBusPath::ListRoles => Ok(Some(Response::list(self.roles.list(storage).await?))),
            ServiceBusPath::ReadRole => self.read_role(storage, fields.get_str("name")).await,
            ServiceBusPath::WriteRole => self.write_role(storage, &fields).await,
            ServiceBusPath::DeleteRole => {
                self.roles.delete(storage, fields.get_str("name")).await?;
                Ok(None)
            }
            ServiceBusPath::Token => self.issue_token(storage, fields.get_str("name")).await,
        }
    }

    async fn renew(
        &self,
        _storage: &dyn Storage,
        _secret: &IssuedSecret,
        _terms: &LeaseTerms,
    ) -> Result<Duration> {
        Err(Error::unsupported("Service Bus tokens carry a fixed expiry and cannot be renewed"))
    }

    async fn revoke(&self, _storage: &dyn Storage, secret: &IssuedSecret) -> Result<()> {
        warn!(
            uri = secret.internal_str("uri").unwrap_or_default(),
            "Service Bus token stays valid until its expiry; rotate the policy key to invalidate it"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    async fn call(
        backend: &AzureServiceBusBackend,
        storage: &MemoryStorage,
        op: Operation,
        path: &str,
        body: Value,
    ) -> Result<Option<Response>> {
        let request = Request::new(op, path).with_data(body.as_object().cloned().unwrap_or_default());
        backend.handle_request(storage, request).await
    }

    #[test]
    fn test_token_format() {
        let signer = SharedKeySigner::from_raw(&SecretString::new("policy-key"));
        let token = sas_token("https://ns.servicebus.windows.net/orders", "send", &signer, 1700000000).unwrap();

        let expected_sig = signer
            .sign("https%3A%2F%2Fns.servicebus.windows.net%2Forders\n1700000000")
            .unwrap();
        assert_eq!(
            token,
            format!(
                "SharedAccessSignature sr=https%3A%2F%2Fns.servicebus.windows.net%2Forders&sig={}&se=1700000000&skn=send",
                encode_component(&expected_sig)
            )
        );
    }

    #[tokio::test]
    async fn test_issue_token() {
        let backend = AzureServiceBusBackend::new(LeaseLimits::default()).unwrap();
        let storage = MemoryStorage::new();
        call(&backend, &storage, Operation::Update, "config/resource", json!({"name": "orders", "namespace": "ns"}))
            .await
            .unwrap();
        call(
            &backend,
            &storage,
            Operation::Update,
            "roles/sender",
            json!({"sas_policy_name": "send", "sas_policy_key": "policy-key", "ttl": "10m"}),
        )
        .await
        .unwrap();

        let before = Utc::now().timestamp();
        let response = call(&backend, &storage, Operation::Read, "token/sender", json!({})).await.unwrap().unwrap();
        let secret = response.secret.unwrap();
        assert_eq!(secret.ttl, Duration::from_secs(600));
        assert_eq!(secret.data["uri"], "https://ns.servicebus.windows.net/orders");
        assert_eq!(secret.data["policy_name"], "send");

        let token = secret.data["token"].as_str().unwrap();
        let se: i64 = token
            .split('&')
            .find_map(|part| part.strip_prefix("se="))
            .unwrap()
            .parse()
            .unwrap();
        assert!((se - (before + 600)).abs() <= 2);

        backend.revoke(&storage, &secret).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_requires_resource() {
        let backend = AzureServiceBusBackend::new(LeaseLimits::default()).unwrap();
        let storage = MemoryStorage::new();
        call(
            &backend,
            &storage,
            Operation::Update,
            "roles/sender",
            json!({"sas_policy_name": "send", "sas_policy_key": "k"}),
        )
        .await
        .unwrap();
        let err = call(&backend, &storage, Operation::Read, "token/sender", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing { .. }));
    }

    #[tokio::test]
    async fn test_role_read_hides_key() {
        let backend = AzureServiceBusBackend::new(LeaseLimits::default()).unwrap();
        let storage = MemoryStorage::new();
        call(
            &backend,
            &storage,
            Operation::Update,
            "roles/sender",
            json!({"sas_policy_name": "send", "sas_policy_key": "k"}),
        )
        .await
        .unwrap();
        let response = call(&backend, &storage, Operation::Read, "roles/sender", json!({})).await.unwrap().unwrap();
        assert_eq!(response.data["sas_policy_name"], "send");
        assert_eq!(response.data["ttl"], "0s");
        assert!(!response.data.contains_key("sas_policy_key"));
    }
}
