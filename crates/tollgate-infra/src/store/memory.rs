//! In-memory store implementation - used by tests and local development.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use tollgate_core::error::StoreError;
use tollgate_core::ports::StoreClient;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Instant::now() > exp).unwrap_or(false)
    }
}

/// In-memory `StoreClient` using a HashMap with async RwLock.
///
/// Counter semantics mirror the wire store: incrementing a non-numeric
/// value errors, expired keys behave as absent. Data is lost on restart.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn ping(&self) -> Result<String, StoreError> {
        Ok("PONG".to_string())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(entry.value.clone()),
                Some(_) => {}
                None => return Err(StoreError::KeyNotFound),
            }
        }
        // Expired entry; clean it up under the write lock.
        self.entries.write().await.remove(key);
        Err(StoreError::KeyNotFound)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = (ttl > Duration::ZERO).then(|| Instant::now() + ttl);
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    StoreError::Server("value is not an integer or out of range".to_string())
                })?;
                (current, entry.expires_at)
            }
            _ => (0, None),
        };
        let updated = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: updated.to_string(),
                expires_at,
            },
        );
        Ok(updated)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(())
            }
            _ => Err(StoreError::KeyNotFound),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry
                .expires_at
                .map(|exp| exp.saturating_duration_since(Instant::now()))),
            _ => Err(StoreError::KeyNotFound),
        }
    }

    async fn exists(&self, keys: &[&str]) -> Result<i64, StoreError> {
        let entries = self.entries.read().await;
        let count = keys
            .iter()
            .filter(|key| entries.get(**key).map(|e| !e.is_expired()).unwrap_or(false))
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get() {
        let store = InMemoryStore::new();
        store.set("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(store.get("nope").await, Err(StoreError::KeyNotFound)));
    }

    #[tokio::test]
    async fn expired_key_behaves_as_absent() {
        let store = InMemoryStore::new();
        store.set("k", "v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(store.get("k").await, Err(StoreError::KeyNotFound)));
        assert_eq!(store.exists(&["k"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn incr_by_creates_and_accumulates() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr_by("uses", 2).await.unwrap(), 2);
        assert_eq!(store.incr_by("uses", 3).await.unwrap(), 5);
        assert_eq!(store.incr("uses").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn incr_on_non_numeric_value_errors() {
        let store = InMemoryStore::new();
        store.set("k", "not-a-number", Duration::ZERO).await.unwrap();
        assert!(matches!(store.incr("k").await, Err(StoreError::Server(_))));
    }

    #[tokio::test]
    async fn expire_and_ttl() {
        let store = InMemoryStore::new();
        store.set("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), None);

        store.expire("k", Duration::from_secs(60)).await.unwrap();
        let remaining = store.ttl("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(58));

        assert!(matches!(
            store.expire("missing", Duration::from_secs(1)).await,
            Err(StoreError::KeyNotFound)
        ));
    }
}
