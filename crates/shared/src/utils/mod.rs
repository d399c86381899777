use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

pub mod google_cloud;
pub mod local;
pub mod signal;

/// Write guard for [`BlobStore::put`]. Stores that hand out generations must
/// reject a write whose precondition no longer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional overwrite
    None,
    /// Only create, fail if the key is already taken
    DoesNotExist,
    /// Only replace the object with this generation
    GenerationMatch(i64),
}

impl Precondition {
    /// The guard to use when replacing an object last seen at `generation`,
    /// or never seen at all.
    pub fn from_observed(generation: Option<i64>) -> Self {
        match generation {
            Some(generation) => Precondition::GenerationMatch(generation),
            None => Precondition::DoesNotExist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub generation: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` was modified by another writer")]
    PreconditionFailed(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError>;

    async fn get(&self, key: &str) -> Result<StoredObject, BlobStoreError>;

    /// Writes `data` under `key` and returns the new generation.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<i64, BlobStoreError>;

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;
}

/// In-memory store for tests. Generations start at 1 and increase per write.
#[derive(Clone, Default)]
pub struct MockBlobStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    next_generation: Arc<AtomicUsize>,
    failing_puts: Arc<AtomicU32>,
    put_calls: Arc<AtomicUsize>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: &str, data: impl Into<Vec<u8>>) -> i64 {
        let generation = self.bump_generation();
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                generation,
            },
        );
        generation
    }

    pub async fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).map(|o| o.data.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Makes the next `count` puts fail with a backend error.
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> i64 {
        (self.next_generation.fetch_add(1, Ordering::SeqCst) + 1) as i64
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<StoredObject, BlobStoreError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<i64, BlobStoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BlobStoreError::Backend("injected failure".to_string()));
        }

        let mut objects = self.objects.lock().await;
        let current = objects.get(key).map(|o| o.generation);
        let allowed = match precondition {
            Precondition::None => true,
            Precondition::DoesNotExist => current.is_none(),
            Precondition::GenerationMatch(expected) => current == Some(expected),
        };
        if !allowed {
            return Err(BlobStoreError::PreconditionFailed(key.to_string()));
        }

        let generation = self.bump_generation();
        objects.insert(key.to_string(), StoredObject { data, generation });
        Ok(generation)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.objects
            .lock()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_conditional_writes() {
        let store = MockBlobStore::new();
        let first = store
            .put("a.zip", b"one".to_vec(), Precondition::DoesNotExist)
            .await
            .unwrap();

        let again = store
            .put("a.zip", b"two".to_vec(), Precondition::DoesNotExist)
            .await;
        assert_eq!(
            again,
            Err(BlobStoreError::PreconditionFailed("a.zip".to_string()))
        );

        let second = store
            .put("a.zip", b"two".to_vec(), Precondition::GenerationMatch(first))
            .await
            .unwrap();
        assert!(second > first);

        let stale = store
            .put("a.zip", b"three".to_vec(), Precondition::GenerationMatch(first))
            .await;
        assert!(stale.is_err());
        assert_eq!(store.contents("a.zip").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_mock_injected_failures() {
        let store = MockBlobStore::new();
        store.fail_next_puts(2);
        for _ in 0..2 {
            assert!(matches!(
                store.put("k", vec![1], Precondition::None).await,
                Err(BlobStoreError::Backend(_))
            ));
        }
        assert!(store.put("k", vec![1], Precondition::None).await.is_ok());
        assert_eq!(store.put_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_get_and_delete() {
        let store = MockBlobStore::new();
        assert!(!store.exists("missing").await.unwrap());
        assert_eq!(
            store.get("missing").await,
            Err(BlobStoreError::NotFound("missing".to_string()))
        );
        let generation = store.insert("k", "v").await;
        assert_eq!(store.get("k").await.unwrap().generation, generation);
        store.delete("k").await.unwrap();
        assert!(store.keys().await.is_empty());
    }

    #[test]
    fn test_precondition_from_observed() {
        assert_eq!(Precondition::from_observed(None), Precondition::DoesNotExist);
        assert_eq!(
            Precondition::from_observed(Some(7)),
            Precondition::GenerationMatch(7)
        );
    }
}
