//! Prefix-scoped window onto a shared [`Storage`].

use std::sync::Arc;

use async_trait::async_trait;

use super::{Storage, StorageEntry};
use crate::errors::Result;

/// Storage seen by a single mount.
///
/// Every key is transparently prefixed, so a backend mounted at `azuresql/`
/// reads and writes `config/connection` while the shared store holds
/// `logical/azuresql/config/connection`.
#[derive(Clone)]
pub struct StorageView {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl StorageView {
    pub fn new(inner: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { inner, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl std::fmt::Debug for StorageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageView").field("prefix", &self.prefix).finish()
    }
}

#[async_trait]
impl Storage for StorageView {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let entry = self.inner.get(&self.full_key(key)).await?;
        Ok(entry.map(|entry| StorageEntry::new(key, entry.value)))
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        let key = self.full_key(&entry.key);
        self.inner.put(StorageEntry::new(key, entry.value)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.full_key(key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(&self.full_key(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_views_are_isolated() {
        let shared: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let sql = StorageView::new(shared.clone(), "logical/azuresql");
        let blob = StorageView::new(shared.clone(), "logical/azurestorage/");

        sql.put(StorageEntry::new("role/web", b"sql".to_vec())).await.unwrap();
        blob.put(StorageEntry::new("role/web", b"blob".to_vec())).await.unwrap();

        assert_eq!(sql.get("role/web").await.unwrap().unwrap().value, b"sql");
        assert_eq!(blob.get("role/web").await.unwrap().unwrap().value, b"blob");
        assert_eq!(sql.get("role/web").await.unwrap().unwrap().key, "role/web");
        assert!(shared.get("logical/azuresql/role/web").await.unwrap().is_some());

        assert_eq!(sql.list("role/").await.unwrap(), vec!["web"]);
        sql.delete("role/web").await.unwrap();
        assert!(sql.list("role/").await.unwrap().is_empty());
        assert_eq!(blob.list("role/").await.unwrap(), vec!["web"]);
    }
}
