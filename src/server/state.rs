use crate::catalog::ClassificationTables;
use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::store_cache::StoreCache;
use crate::store_db::CatalogStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared by every handler. The single SQLite connection sits behind one
/// mutex, which serializes all writes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<CatalogStore>>,
    pub cache: StoreCache,
    pub limiter: RateLimiter,
    pub tables: Arc<ClassificationTables>,
}

impl AppState {
    pub fn new(db: CatalogStore, tables: ClassificationTables, config: &Config) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            cache: StoreCache::new(Duration::from_secs(config.store_cache.ttl_secs)),
            limiter: RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            ),
            tables: Arc::new(tables),
        }
    }
}
