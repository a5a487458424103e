//! # Storage and Persistence
//!
//! The backends persist their configuration singletons and roles through the
//! [`Storage`] key-value interface. Values are JSON documents; keys are
//! slash-separated paths such as `config/connection` or `role/web`.
//!
//! Two implementations ship with the crate: [`MemoryStorage`] for tests and
//! ephemeral runs, and [`SqlStorage`] backed by a SQLite pool. Each mounted
//! backend sees its own [`StorageView`] so keys never collide across mounts.

pub mod config_store;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod sql;
pub mod view;

pub use crate::config::DatabaseConfig;

pub use memory::MemoryStorage;
pub use migrations::{get_migration_version, run_migrations};
pub use pool::{create_pool, DbPool};
pub use sql::SqlStorage;
pub use view::StorageView;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{Error, Result};

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self { key: key.into(), value }
    }

    /// Encode `value` as JSON under `key`.
    pub fn json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self> {
        let key = key.into();
        let value = serde_json::to_vec(value)
            .map_err(|e| Error::from(e).context(format!("encode entry '{}'", key)))?;
        Ok(Self { key, value })
    }

    /// Decode the stored JSON document.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.value)
            .map_err(|e| Error::from(e).context(format!("decode entry '{}'", self.key)))
    }
}

/// Opaque key-value persistence consumed by the backends.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>>;

    /// Insert or fully replace the entry at `entry.key`.
    async fn put(&self, entry: StorageEntry) -> Result<()>;

    /// Remove `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Immediate children of `prefix`, sorted. Nested keys collapse into a
    /// single folder entry ending in `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reduce a sorted or unsorted set of full keys to the immediate children of
/// `prefix`.
pub(crate) fn immediate_children<'a, I>(keys: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut children = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.find('/') {
            Some(idx) => children.insert(rest[..=idx].to_string()),
            None => children.insert(rest.to_string()),
        };
    }
    children.into_iter().collect()
}
