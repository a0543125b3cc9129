use crate::store_db::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    store: Store,
    expires_at: Instant,
}

/// Store lookups by code with a fixed TTL. Only hits are cached; an unknown
/// code always goes back to the database.
#[derive(Clone)]
pub struct StoreCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl StoreCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, code: &str) -> Option<Store> {
        let entries = self.entries.read().await;
        let entry = entries.get(code)?;
        if Instant::now() >= entry.expires_at {
            debug!(code = %code, "Store cache entry expired");
            return None;
        }
        Some(entry.store.clone())
    }

    pub async fn insert(&self, store: Store) {
        let mut entries = self.entries.write().await;
        entries.insert(
            store.code.clone(),
            CacheEntry {
                store,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Cached value when fresh, otherwise the result of `fetch`, which is
    /// cached when it finds a store.
    pub async fn get_or_fetch<F, Fut, E>(&self, code: &str, fetch: F) -> Result<Option<Store>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Store>, E>>,
    {
        if let Some(store) = self.get(code).await {
            return Ok(Some(store));
        }
        let fetched = fetch().await?;
        if let Some(store) = &fetched {
            self.insert(store.clone()).await;
        }
        Ok(fetched)
    }

    pub async fn invalidate(&self, code: &str) {
        if self.entries.write().await.remove(code).is_some() {
            debug!(code = %code, "Store cache entry invalidated");
        }
    }

    pub async fn invalidate_by_store_id(&self, store_id: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.store.id != store_id);
    }

    #[cfg(test)]
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(id: &str, code: &str) -> Store {
        Store {
            id: id.to_string(),
            code: code.to_string(),
            name: "Test".to_string(),
            timezone: "America/Los_Angeles".to_string(),
            is_active: true,
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let cache = StoreCache::new(Duration::from_secs(60));
        cache.insert(store("s1", "2475")).await;

        let found = cache
            .get_or_fetch("2475", || async { Err::<Option<Store>, _>("fetch ran on a hit") })
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "s1");
    }

    #[tokio::test]
    async fn test_miss_fetches_and_fills() {
        let cache = StoreCache::new(Duration::from_secs(60));
        let found = cache
            .get_or_fetch("1", || async { Ok::<_, ()>(Some(store("s1", "1"))) })
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(cache.len().await, 1);

        let missing = cache
            .get_or_fetch("2", || async { Ok::<_, ()>(None) })
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = StoreCache::new(Duration::from_secs(15 * 60));
        cache.insert(store("s1", "1")).await;
        tokio::time::advance(Duration::from_secs(14 * 60)).await;
        assert!(cache.get("1").await.is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation() {
        let cache = StoreCache::new(Duration::from_secs(60));
        cache.insert(store("s1", "1")).await;
        cache.insert(store("s2", "2")).await;
        cache.insert(store("s3", "3")).await;

        cache.invalidate("1").await;
        assert!(cache.get("1").await.is_none());

        cache.invalidate_by_store_id("s2").await;
        assert!(cache.get("2").await.is_none());
        assert!(cache.get("3").await.is_some());

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
