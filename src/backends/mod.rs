//! Secret backends
//!
//! Each backend is mounted once and serves its own logical paths. The lease
//! subsystem talks to it through [`LogicalBackend`]: requests in, responses
//! (possibly carrying an [`IssuedSecret`]) out, plus the renew and revoke
//! callbacks for secrets it issued earlier.

pub mod azureservicebus;
pub mod azuresql;
pub mod azurestorage;
pub mod client_slot;
pub mod lease_path;
pub mod sas;

pub use azureservicebus::AzureServiceBusBackend;
pub use azuresql::AzureSqlBackend;
pub use azurestorage::AzureStorageBackend;
pub use client_slot::ClientSlot;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::framework::{Request, Response};
use crate::secrets::{IssuedSecret, LeaseTerms};
use crate::storage::Storage;

/// Kind of secret backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Azure SQL logins with optional firewall rules
    AzureSql,
    /// Azure Storage blob/container SAS URIs
    AzureStorage,
    /// Azure Service Bus SAS tokens
    AzureServiceBus,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureSql => "azuresql",
            Self::AzureStorage => "azurestorage",
            Self::AzureServiceBus => "azureservicebus",
        }
    }
}

impl FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "azuresql" => Ok(Self::AzureSql),
            "azurestorage" => Ok(Self::AzureStorage),
            "azureservicebus" => Ok(Self::AzureServiceBus),
            _ => Err(Error::validation(format!("Unknown backend type: {}", s))),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mounted secret backend.
///
/// Implementations are shared across concurrent requests and must be
/// `Send + Sync`. The storage handle passed on each call is already scoped
/// to the mount.
#[async_trait]
pub trait LogicalBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Serve a path request. `Ok(None)` means "nothing to return".
    async fn handle_request(&self, storage: &dyn Storage, request: Request)
        -> Result<Option<Response>>;

    /// Compute the TTL granted when a lease on `secret` is renewed.
    async fn renew(
        &self,
        storage: &dyn Storage,
        secret: &IssuedSecret,
        terms: &LeaseTerms,
    ) -> Result<Duration>;

    /// Undo the side effects of `secret`. Must be safe to call again after a
    /// failure or a previous success.
    async fn revoke(&self, storage: &dyn Storage, secret: &IssuedSecret) -> Result<()>;
}
