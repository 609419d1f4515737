use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectEntry, Storage};

/// In-memory, `BTreeMap`-based storage.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock`;
/// listings come back in key order. Conditional creates are atomic because
/// the existence check and the insert happen under one write lock.
pub struct InMemoryStorage {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl InMemoryStorage {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Every stored key, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Remove all objects from the store.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn is_below(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn stat(&self, key: &str) -> StoreResult<u64> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        debug!(key, size = data.len(), "memory put");
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(key) {
            return Ok(false);
        }
        debug!(key, size = data.len(), "memory create");
        map.insert(key.to_string(), data);
        Ok(true)
    }

    fn atomic_create(&self) -> bool {
        true
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let prefix = prefix.trim_end_matches('/');
        let map = self.objects.read().expect("lock poisoned");
        Ok(map
            .iter()
            .filter(|(key, _)| is_below(key, prefix))
            .map(|(key, data)| ObjectEntry::new(key.clone(), data.len() as u64))
            .collect())
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryStorage")
            .field("object_count", &count)
            .finish()
    }
}
