//! Role registry.
//!
//! Roles are named templates stored at `role/<name>`. Each backend brings its
//! own role payload type; the registry only handles persistence and naming.
//! Writes overwrite, deletes are idempotent, and nothing here touches the
//! cloud resources a role refers to.

use std::marker::PhantomData;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::storage::{Storage, StorageEntry};

/// Storage prefix for role entries.
pub const ROLE_PREFIX: &str = "role/";

/// Longest accepted role name.
pub const MAX_ROLE_NAME_LEN: usize = 64;

lazy_static! {
    static ref ROLE_NAME_REGEX: Regex = Regex::new(r"^\w(([\w.-]+)?\w)?$")
        .expect("ROLE_NAME_REGEX should be a valid regex pattern");
}

/// Check that `name` can be used as a role name.
pub fn validate_role_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation_field("role name cannot be empty", "name"));
    }
    if name.len() > MAX_ROLE_NAME_LEN {
        return Err(Error::validation_field(
            format!("role name cannot exceed {} characters", MAX_ROLE_NAME_LEN),
            "name",
        ));
    }
    if !ROLE_NAME_REGEX.is_match(name) {
        return Err(Error::validation_field(
            format!("invalid role name '{}'", name),
            "name",
        ));
    }
    Ok(())
}

/// CRUD over the roles of one backend, typed by its role payload `R`.
pub struct RoleRegistry<R> {
    _role: PhantomData<fn() -> R>,
}

impl<R> RoleRegistry<R> {
    pub const fn new() -> Self {
        Self { _role: PhantomData }
    }
}

impl<R> Default for RoleRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for RoleRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleRegistry").field("prefix", &ROLE_PREFIX).finish()
    }
}

impl<R> RoleRegistry<R>
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    fn key(name: &str) -> String {
        format!("{}{}", ROLE_PREFIX, name)
    }

    /// Persist `role`, replacing any previous definition.
    pub async fn write(&self, storage: &dyn Storage, name: &str, role: &R) -> Result<()> {
        validate_role_name(name)?;
        storage.put(StorageEntry::json(Self::key(name), role)?).await?;
        debug!(role = %name, "role written");
        Ok(())
    }

    pub async fn read(&self, storage: &dyn Storage, name: &str) -> Result<Option<R>> {
        match storage.get(&Self::key(name)).await? {
            Some(entry) => entry.decode_json().map(Some),
            None => Ok(None),
        }
    }

    /// Read a role that an issuance request depends on.
    pub async fn require(&self, storage: &dyn Storage, name: &str) -> Result<R> {
        self.read(storage, name)
            .await?
            .ok_or_else(|| Error::configuration_missing(format!("unknown role: {}", name)))
    }

    /// Role names in lexicographic order.
    pub async fn list(&self, storage: &dyn Storage) -> Result<Vec<String>> {
        storage.list(ROLE_PREFIX).await
    }

    /// Remove a role. Unknown names succeed. Outstanding secrets are unaffected.
    pub async fn delete(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        storage.delete(&Self::key(name)).await?;
        debug!(role = %name, "role deleted");
        Ok(())
    }
}
