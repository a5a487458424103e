//! # Azure Storage Backend
//!
//! Issues blob or container SAS URIs for configured roles. The URI expires
//! on its own, so leases are not renewable and revocation has nothing to
//! clean up.
//!
//! Paths: `config/account`, `config/resource`, `config/lease`, `roles/`,
//! `roles/<name>`, `token/<name>`.

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use self::client::{BlobSasRequest, SharedKeyClient, StorageAccountClient};
use super::{lease_path, BackendType, ClientSlot, LogicalBackend};
use crate::errors::{Error, Result};
use crate::framework::{generic_name_regex, FieldData, FieldSchema, Operation, Request, Response, Router};
use crate::secrets::duration::{canonical, format_duration};
use crate::secrets::{bounded_ttl, IssuedSecret, LeaseLimits, LeaseTerms, RoleRegistry, SecretString};
use crate::storage::config_store::{
    read_config, read_lease_config, require_config, write_config, AccountConfig, ResourceConfig,
    ACCOUNT_KEY, DEFAULT_API_VERSION, DEFAULT_BASE_URL, RESOURCE_KEY,
};
use crate::storage::Storage;

pub const SECRET_TYPE: &str = "token";

/// Blob resource and rights granted by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRole {
    pub container: String,
    #[serde(default)]
    pub blob: String,
    pub permissions: String,
    /// Zero defers to `config/lease`.
    #[serde(with = "canonical", default)]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoragePath {
    ReadAccount,
    WriteAccount,
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

pub struct AzureStorageBackend {
    client: Mutex<ClientSlot<dyn StorageAccountClient>>,
    router: Router<StoragePath>,
    roles: RoleRegistry<StorageRole>,
    limits: LeaseLimits,
}

impl std::fmt::Debug for AzureStorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStorageBackend").field("limits", &self.limits).finish()
    }
}

impl AzureStorageBackend {
    pub fn new(limits: LeaseLimits) -> Result<Self> {
        Ok(Self {
            client: Mutex::new(ClientSlot::new()),
            router: build_router()?,
            roles: RoleRegistry::new(),
            limits,
        })
    }

    async fn client(&self, storage: &dyn Storage) -> Result<Arc<dyn StorageAccountClient>> {
        let mut slot = self.client.lock().await;
        slot.get_or_init(|| async move {
            let account: AccountConfig = require_config(storage, ACCOUNT_KEY).await?;
            let client: Arc<dyn StorageAccountClient> = Arc::new(SharedKeyClient::from_account(&account)?);
            Ok(client)
        })
        .await
    }

    async fn read_account(&self, storage: &dyn Storage) -> Result<Option<Response>> {
        let Some(account) = read_config::<AccountConfig>(storage, ACCOUNT_KEY).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("account_name".into(), Value::from(account.account_name));
        data.insert("base_url".into(), Value::from(account.base_url));
        data.insert("api_version".into(), Value::from(account.api_version));
        data.insert("use_https".into(), Value::from(account.use_https));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_account(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let account = AccountConfig {
            account_name: fields.get_str("account_name").to_string(),
            account_key: SecretString::new(fields.get_str("account_key")),
            base_url: fields.get_str("base_url").to_string(),
            api_version: fields.get_str("api_version").to_string(),
            use_https: fields.get_bool("use_https"),
        };

        // Also rejects a key that is not valid base64.
        let client = SharedKeyClient::from_account(&account)?;
        if fields.get_bool("verify") {
            client
                .list_containers()
                .await
                .map_err(|e| e.context("error validating account info"))?;
        }

        let mut slot = self.client.lock().await;
        write_config(storage, ACCOUNT_KEY, &account).await?;
        slot.invalidate();
        info!(account = %account.account_name, endpoint = %account.blob_endpoint(), "storage account configured");
        Ok(None)
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
        let uri = fields.get_str("uri");
        url::Url::parse(uri)
            .map_err(|e| Error::validation_field(format!("invalid uri '{}': {}", uri, e), "uri"))?;
        write_config(storage, RESOURCE_KEY, &ResourceConfig { uri: uri.to_string() }).await?;
        Ok(None)
    }

    async fn read_role(&self, storage: &dyn Storage, name: &str) -> Result<Option<Response>> {
        let Some(role) = self.roles.read(storage, name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("container".into(), Value::from(role.container));
        data.insert("blob".into(), Value::from(role.blob));
        data.insert("permissions".into(), Value::from(role.permissions));
        data.insert("ttl".into(), Value::from(format_duration(role.ttl)));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_role(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let role = StorageRole {
            container: fields.get_str("container").to_string(),
            blob: fields.get_str("blob").to_string(),
            permissions: fields.get_str("permissions").to_string(),
            ttl: fields.get_duration("ttl").unwrap_or_default(),
        };
        self.roles.write(storage, fields.get_str("name"), &role).await?;
        Ok(None)
    }

    #[instrument(skip(self, storage), fields(role = %name))]
    async fn issue_token(&self, storage: &dyn Storage, name: &str) -> Result<Option<Response>> {
        let role = self.roles.require(storage, name).await?;
        let lease = read_lease_config(storage).await?;
        let ttl = bounded_ttl(Some(role.ttl), lease.as_ref(), &self.limits);

        let client = self.client(storage).await?;
        let expiry = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| Error::validation(format!("ttl out of range: {}", e)))?;
        let request = BlobSasRequest {
            container: &role.container,
            blob: &role.blob,
            permissions: &role.permissions,
            expiry,
        };
        let token = client.sas_token(&request)?;

        let base = match read_config::<ResourceConfig>(storage, RESOURCE_KEY).await? {
            Some(resource) => resource.uri,
            None => client.endpoint().to_string(),
        };
        let uri = format!("{}{}?{}", base.trim_end_matches('/'), request.resource_path(), token);
        debug!(container = %role.container, blob = %role.blob, expiry = %expiry, "SAS issued");

        let secret = IssuedSecret::new(SECRET_TYPE)
            .with_data("account", client.account_name())
            .with_data("uri", uri)
            .with_data("token", token)
            .with_data("container", role.container.as_str())
            .with_data("blob", role.blob.as_str())
            .with_data("permissions", role.permissions.as_str())
            .with_ttl(ttl)
            .non_renewable();
        Ok(Some(Response::with_secret(secret)))
    }
}

fn build_router() -> Result<Router<StoragePath>> {
    Router::new()
        .path(
            "config/account",
            vec![
                FieldSchema::string("account_name", "Storage Account Name").required(),
                FieldSchema::string("account_key", "Storage Account Key").required(),
                FieldSchema::string("base_url", "Base URL of blob service").with_default(DEFAULT_BASE_URL),
                FieldSchema::string("api_version", "Azure API version used")
                    .with_default(DEFAULT_API_VERSION),
                FieldSchema::bool("use_https", "Whether HTTPS is used").with_default(true),
                FieldSchema::bool("verify", "If set, the account credentials are verified")
                    .with_default(true),
            ],
            vec![
                (Operation::Read, StoragePath::ReadAccount),
                (Operation::Update, StoragePath::WriteAccount),
            ],
        )?
        .path(
            "config/resource",
            vec![FieldSchema::string("uri", "Base URI used in issued SAS URIs").required()],
            vec![
                (Operation::Read, StoragePath::ReadResource),
                (Operation::Update, StoragePath::WriteResource),
            ],
        )?
        .path(
            lease_path::PATTERN,
            lease_path::fields(),
            vec![
                (Operation::Read, StoragePath::ReadLease),
                (Operation::Update, StoragePath::WriteLease),
            ],
        )?
        .path("roles/?", vec![], vec![(Operation::List, StoragePath::ListRoles)])?
        .path(
            &format!("roles/{}", generic_name_regex("name")),
            vec![
                FieldSchema::string("name", "Name of the role"),
                FieldSchema::string("container", "Container name").required(),
                FieldSchema::string("blob", "Name of blob"),
                FieldSchema::string("permissions", "Permissions e.g. rw").required(),
                FieldSchema::duration("ttl", "Lease time of the role"),
            ],
            vec![
                (Operation::Read, StoragePath::ReadRole),
                (Operation::Update, StoragePath::WriteRole),
                (Operation::Delete, StoragePath::DeleteRole),
            ],
        )?
        .path(
            &format!("token/{}", generic_name_regex("name")),
            vec![FieldSchema::string("name", "Name of the role")],
            vec![(Operation::Read, StoragePath::Token)],
        )
}

#[async_trait]
impl LogicalBackend for AzureStorageBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::AzureStorage
    }

    #[instrument(skip(self, storage, request), fields(operation = %request.operation, path = %request.path))]
    async fn handle_request(&self, storage: &dyn Storage, request: Request) -> Result<Option<Response>> {
        let (path, fields) = self.router.route(&request)?;
        match path {
            StoragePath::ReadAccount => self.read_account(storage).await,
            StoragePath::WriteAccount => self.write_account(storage, &fields).await,
            StoragePath::ReadResource => self.read_resource(storage).await,
            StoragePath::WriteResource => self.write_resource(storage, &fields).await,
            StoragePath::ReadLease => lease_path::read(storage).await,
            StoragePath::WriteLease => lease_path::write(storage, &fields).await,
            StoragePath::ListRoles => Ok(Some(Response::list(self.roles.list(storage).await?))),
            StoragePath::ReadRole => self.read_role(storage, fields.get_str("name")).await,
            StoragePath::WriteRole => self.write_role(storage, &fields).await,
            StoragePath::DeleteRole => {
                self.roles.delete(storage, fields.get_str("name")).await?;
                Ok(None)
            }
            StoragePath::Token => self.issue_token(storage, fields.get_str("name")).await,
        }
    }

    async fn renew(
        &self,
        _storage: &dyn Storage,
        _secret: &IssuedSecret,
        _terms: &LeaseTerms,
    ) -> Result<Duration> {
        Err(Error::unsupported("SAS tokens carry a fixed expiry and cannot be renewed"))
    }

    async fn revoke(&self, _storage: &dyn Storage, _secret: &IssuedSecret) -> Result<()> {
        Ok(())
    }
}
