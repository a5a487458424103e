//! Lazily initialized, explicitly invalidated client handle.

use std::future::Future;
use std::sync::Arc;

use crate::errors::Result;

/// Holds at most one live client.
///
/// The slot lives inside the backend's state mutex, so initialization happens
/// at most once per configuration. Callers clone the `Arc` out and release
/// the lock before using the client.
#[derive(Debug)]
pub struct ClientSlot<T: ?Sized> {
    client: Option<Arc<T>>,
}

impl<T: ?Sized> Default for ClientSlot<T> {
    fn default() -> Self {
        Self { client: None }
    }
}

impl<T: ?Sized> ClientSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client, building it with `init` when empty.
    ///
    /// A failed `init` leaves the slot empty so the next call retries.
    pub async fn get_or_init<F, Fut>(&mut self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = init().await?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached client; the next access re-initializes.
    pub fn invalidate(&mut self) {
        self.client = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_initializes_once_until_invalidated() {
        let builds = AtomicUsize::new(0);
        let mut slot: ClientSlot<String> = ClientSlot::new();

        for _ in 0..3 {
            let client = slot
                .get_or_init(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new("client".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(client.as_str(), "client");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        slot.invalidate();
        assert!(!slot.is_initialized());
        slot.get_or_init(|| async {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new("fresh".to_string()))
        })
        .await
        .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_slot_empty() {
        let mut slot: ClientSlot<String> = ClientSlot::new();
        let result = slot.get_or_init(|| async { Err(Error::upstream("sql", "refused")) }).await;
        assert!(result.is_err());
        assert!(!slot.is_initialized());
    }
}
