use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{KeyValueStore, StoreError};
use crate::metrics::STORE_OPERATIONS;

/// Process-local store used for development and tests.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    store: Arc<RwLock<HashMap<String, StoreEntry>>>,
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            Instant::now() > expires_at
        } else {
            false
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn live<'a>(store: &'a HashMap<String, StoreEntry>, key: &str) -> Option<&'a StoreEntry> {
        store.get(key).filter(|entry| !entry.is_expired())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        STORE_OPERATIONS.inc();
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        STORE_OPERATIONS.inc();
        let mut store = self.store.write().await;
        store.insert(key.to_string(), StoreEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        STORE_OPERATIONS.inc();
        let mut store = self.store.write().await;
        if Self::live(&store, key).is_some() {
            return Ok(false);
        }
        store.insert(key.to_string(), StoreEntry::new(value.to_string(), ttl));
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        STORE_OPERATIONS.inc();
        let mut store = self.store.write().await;
        let current = Self::live(&store, key).map(|entry| entry.value.as_str());
        if current != expected {
            return Ok(false);
        }
        store.insert(key.to_string(), StoreEntry::new(new.to_string(), ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        STORE_OPERATIONS.inc();
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        STORE_OPERATIONS.inc();
        let store = self.store.read().await;
        let mut keys: Vec<String> = store
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
