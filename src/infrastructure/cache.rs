use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::common::error::AppResult;

/// Abstraction over the substrate backing every cached layer in the system
/// (realm lookups, JWKS, permission snapshots, guest rate-limit counters).
/// Redis in production, in-memory for tests, so service code never depends
/// on a concrete backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<()>;
    async fn delete_pattern(&self, pattern: &str) -> AppResult<u64>;
    /// Atomically increments `key` and returns the post-increment value,
    /// setting `ttl` only the first time the key is created.
    async fn incr(&self, key: &str, ttl: Duration) -> AppResult<i64>;
}

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> AppResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = conn.del(&keys).await?;
        Ok(deleted)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> AppResult<i64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: i64 = conn.incr(key, 1).await?;
        if value == 1 {
            let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        }
        Ok(value)
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory fake used by tests and by local development without Redis.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut store = self.store.write().await;
        if let Some(entry) = store.get(key) {
            if entry.expires_at.map(|at| at <= Instant::now()).unwrap_or(false) {
                store.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> AppResult<()> {
        let mut store = self.store.write().await;
        store.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> AppResult<u64> {
        let prefix = pattern.trim_end_matches('*');
        let mut store = self.store.write().await;
        let matching: Vec<String> = store
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let count = matching.len() as u64;
        for key in matching {
            store.remove(&key);
        }
        Ok(count)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> AppResult<i64> {
        let mut store = self.store.write().await;
        let entry = store.entry(key.to_string()).or_insert_with(|| Entry {
            value: b"0".to_vec(),
            expires_at: Some(Instant::now() + ttl),
        });
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_get_miss_returns_none() {
        let cache = InMemoryStore::new();
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_set_then_get_roundtrips() {
        let cache = InMemoryStore::new();
        cache
            .set_ex("key", vec![1, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("key").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn in_memory_entries_expire() {
        let cache = InMemoryStore::new();
        cache
            .set_ex("key", vec![1], Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_delete_pattern_removes_prefixed_keys() {
        let cache = InMemoryStore::new();
        cache
            .set_ex("perm:tenant-a:user-1", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_ex("perm:tenant-a:user-2", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_ex("perm:tenant-b:user-1", vec![1], Duration::from_secs(60))
            .await
            .unwrap();

        let deleted = cache.delete_pattern("perm:tenant-a:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache
            .get("perm:tenant-b:user-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn in_memory_incr_counts_up() {
        let cache = InMemoryStore::new();
        let a = cache.incr("counter", Duration::from_secs(60)).await.unwrap();
        let b = cache.incr("counter", Duration::from_secs(60)).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}
