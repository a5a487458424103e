//! Configuration singletons persisted under `config/*`.
//!
//! Every backend keeps its connectivity and authentication material as one
//! JSON document per key. Writes fully replace the prior value. A missing
//! entry reads as `None`; operations that cannot proceed without it use
//! [`require_config`] to surface [`Error::ConfigurationMissing`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{Storage, StorageEntry};
use crate::errors::{Error, Result};
use crate::secrets::lease::{LeaseConfig, LEASE_CONFIG_KEY};
use crate::secrets::types::SecretString;

pub const CONNECTION_KEY: &str = "config/connection";
pub const SUBSCRIPTION_KEY: &str = "config/subscription";
pub const ACCOUNT_KEY: &str = "config/account";
pub const RESOURCE_KEY: &str = "config/resource";

/// Blob service base URL used when `config/account` does not set one.
pub const DEFAULT_BASE_URL: &str = "core.windows.net";
/// Storage REST API version used when `config/account` does not set one.
pub const DEFAULT_API_VERSION: &str = "2016-05-31";

const DEFAULT_MAX_OPEN_CONNECTIONS: i64 = 2;

pub async fn read_config<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(entry) => entry.decode_json().map(Some),
        None => Ok(None),
    }
}

/// Read a configuration entry that must exist.
pub async fn require_config<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<T> {
    read_config(storage, key).await?.ok_or_else(|| {
        Error::configuration_missing(format!("configure the backend with {} first", key))
    })
}

pub async fn write_config<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    storage.put(StorageEntry::json(key, value)?).await
}

/// Backend lease policy, if one was written.
pub async fn read_lease_config(storage: &dyn Storage) -> Result<Option<LeaseConfig>> {
    read_config(storage, LEASE_CONFIG_KEY).await
}

/// SQL connection settings at `config/connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub connection_url: SecretString,
    /// Deprecated spelling of `connection_url`, kept for older writers.
    #[serde(default)]
    pub value: SecretString,
    #[serde(default)]
    pub max_open_connections: i64,
    #[serde(default)]
    pub max_idle_connections: i64,
}

impl ConnectionConfig {
    /// Build a connection config from request fields.
    ///
    /// `connection_url` takes precedence over the deprecated `value`; one of
    /// them must be present. Pool sizes are normalized with
    /// [`normalize_pool_sizes`].
    pub fn from_fields(
        connection_url: &str,
        value: &str,
        max_open_connections: i64,
        max_idle_connections: i64,
    ) -> Result<Self> {
        let url = if connection_url.is_empty() { value } else { connection_url };
        if url.is_empty() {
            return Err(Error::validation_field(
                "connection_url parameter must be supplied",
                "connection_url",
            ));
        }

        let (open, idle) = normalize_pool_sizes(max_open_connections, max_idle_connections);
        Ok(Self {
            connection_url: SecretString::new(url),
            value: SecretString::new(value),
            max_open_connections: open,
            max_idle_connections: idle,
        })
    }

    /// Effective connection string, falling back to the deprecated field.
    pub fn url(&self) -> &str {
        if self.connection_url.is_empty() {
            self.value.expose_secret()
        } else {
            self.connection_url.expose_secret()
        }
    }
}

/// Normalize pool sizes.
///
/// A zero open limit becomes 2 and a negative one means unlimited. A zero
/// idle limit follows the open limit, a negative one disables idle
/// connections, and idle never exceeds a positive open limit.
pub fn normalize_pool_sizes(max_open: i64, max_idle: i64) -> (i64, i64) {
    let open = if max_open == 0 { DEFAULT_MAX_OPEN_CONNECTIONS } else { max_open };
    let mut idle = if max_idle == 0 { open } else { max_idle };
    if open > 0 && idle > open {
        idle = open;
    }
    (open, idle)
}

/// Azure management subscription at `config/subscription`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub subscription_id: String,
    /// Base64-encoded PEM bundle holding the management certificate and key.
    pub management_cert: SecretString,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_settings: Option<SecretString>,
}

/// Storage account credentials at `config/account`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_name: String,
    pub account_key: SecretString,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_use_https")]
    pub use_https: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_use_https() -> bool {
    true
}

impl AccountConfig {
    /// Blob service endpoint, e.g. `https://acct.blob.core.windows.net`.
    pub fn blob_endpoint(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}.blob.{}", scheme, self.account_name, self.base_url)
    }
}

/// Resource identifier at `config/resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    #[test]
    fn test_pool_size_normalization() {
        assert_eq!(normalize_pool_sizes(0, 0), (2, 2));
        assert_eq!(normalize_pool_sizes(10, 0), (10, 10));
        assert_eq!(normalize_pool_sizes(4, 9), (4, 4));
        assert_eq!(normalize_pool_sizes(4, -1), (4, -1));
        assert_eq!(normalize_pool_sizes(-1, 50), (-1, 50));
    }

    #[test]
    fn test_connection_config_prefers_connection_url() {
        let config = ConnectionConfig::from_fields("sqlserver://a", "sqlserver://b", 0, 0).unwrap();
        assert_eq!(config.url(), "sqlserver://a");

        let legacy = ConnectionConfig::from_fields("", "sqlserver://b", 0, 0).unwrap();
        assert_eq!(legacy.url(), "sqlserver://b");

        assert!(matches!(
            ConnectionConfig::from_fields("", "", 0, 0),
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_config_is_explicit() {
        let storage = MemoryStorage::new();
        let missing: Option<AccountConfig> = read_config(&storage, ACCOUNT_KEY).await.unwrap();
        assert!(missing.is_none());

        let err = require_config::<AccountConfig>(&storage, ACCOUNT_KEY).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing { .. }));
        assert!(err.to_string().contains("config/account"));
    }

    #[tokio::test]
    async fn test_account_defaults_and_round_trip() {
        let storage = MemoryStorage::new();
        storage
            .put(StorageEntry::new(
                ACCOUNT_KEY,
                br#"{"account_name":"acct","account_key":"a2V5"}"#.to_vec(),
            ))
            .await
            .unwrap();

        let account: AccountConfig = require_config(&storage, ACCOUNT_KEY).await.unwrap();
        assert_eq!(account.base_url, DEFAULT_BASE_URL);
        assert_eq!(account.api_version, DEFAULT_API_VERSION);
        assert!(account.use_https);
        assert_eq!(account.blob_endpoint(), "https://acct.blob.core.windows.net");

        write_config(&storage, ACCOUNT_KEY, &account).await.unwrap();
        let again: AccountConfig = require_config(&storage, ACCOUNT_KEY).await.unwrap();
        assert_eq!(again, account);
    }

    #[tokio::test]
    async fn test_lease_config_absent_then_present() {
        let storage = MemoryStorage::new();
        assert!(read_lease_config(&storage).await.unwrap().is_none());

        let lease = LeaseConfig { ttl: Duration::from_secs(3900), ttl_max: Duration::ZERO };
        write_config(&storage, LEASE_CONFIG_KEY, &lease).await.unwrap();
        assert_eq!(read_lease_config(&storage).await.unwrap(), Some(lease));
    }
}
