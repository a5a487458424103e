//! # leasebound
//!
//! Lease-bound dynamic secrets for Azure. Every credential handed out is
//! tied to a lease with a TTL and a maximum lifetime; when the lease is
//! revoked or expires, the credential is destroyed on the Azure side.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API (axum) → LeaseManager → LogicalBackend (azuresql | azurestorage | azureservicebus)
//!                        ↓                 ↓
//!                  lease records      StorageView (config singletons, roles)
//!                        └──── Storage (SQLite via sqlx, or in-memory) ────┘
//! ```
//!
//! ## Backends
//!
//! - **azuresql**: creates a contained database user per request by running
//!   role SQL templates, optionally opening a server firewall rule; revoke
//!   disables the login, kills its sessions, drops it and removes the rule.
//! - **azurestorage**: signs blob or container SAS URIs with the account key.
//! - **azureservicebus**: signs Service Bus SAS tokens for a policy.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasebound::{backends::AzureSqlBackend, leases::LeaseManager, storage::MemoryStorage};
//! use leasebound::secrets::LeaseLimits;
//!
//! # fn main() -> leasebound::Result<()> {
//! let limits = LeaseLimits::default();
//! let mut leases = LeaseManager::new(Arc::new(MemoryStorage::new()), limits);
//! leases.mount("azuresql", Arc::new(AzureSqlBackend::new(limits)?))?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backends;
pub mod config;
pub mod errors;
pub mod framework;
pub mod leases;
pub mod observability;
pub mod secrets;
pub mod storage;
pub mod testing;

pub use config::AppConfig;
pub use errors::{Error, Result};
pub use leases::LeaseManager;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
