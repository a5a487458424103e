//! SQLite-backed [`Storage`].

use async_trait::async_trait;
use sqlx::Row;

use super::{immediate_children, DbPool, Storage, StorageEntry};
use crate::errors::{Error, Result};

/// Key-value entries persisted in the `kv_entries` table.
#[derive(Debug, Clone)]
pub struct SqlStorage {
    pool: DbPool,
}

impl SqlStorage {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Cheap connectivity probe used by the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::storage(e, "Storage connectivity check failed"))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqlStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage(e, format!("Failed to read '{}'", key)))?;

        Ok(row.map(|row| StorageEntry::new(key, row.get::<Vec<u8>, _>("value"))))
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e, format!("Failed to write '{}'", entry.key)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage(e, format!("Failed to delete '{}'", key)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Keys sort lexicographically, so everything under `prefix` follows it.
        let rows = sqlx::query("SELECT key FROM kv_entries WHERE key >= ? ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage(e, format!("Failed to list '{}'", prefix)))?;

        let keys: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("key"))
            .take_while(|key| key.starts_with(prefix))
            .collect();
        Ok(immediate_children(keys.iter().map(String::as_str), prefix))
    }
}
