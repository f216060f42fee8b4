//! Read-through, write-invalidate cache facade.
//!
//! [`Cache`] stores JSON-encoded values in a shared [`CacheStore`] under
//! caller-chosen string keys (see [`keys`]).
//!
//! - Reads go through [`Cache::read_through`]: a hit is returned as is, a miss
//!   loads from the store of record and populates the entry with the default
//!   TTL. Concurrent readers of a cold key share one load. Cache failures are
//!   logged and treated as misses; they never fail a read.
//! - Writes never refresh entries. After a mutation commits, the service calls
//!   [`Cache::invalidate`] with every key that could hold the mutated row, and
//!   the next reader repopulates them. Invalidation failures are logged; the
//!   stale entry then lives until its TTL.

pub mod keys;
mod store;

pub use store::{CacheStore, MemoryCache};

use crate::{Error, Result};
use core::{future::Future, time::Duration};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a call does not override it.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "cache TTL must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

type Flights = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Typed facade over a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    flights: Flights,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            flights: Arc::default(),
        })
    }

    /// A cache over a fresh [`MemoryCache`].
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryCache::new()), config)
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    pub async fn set_with_ttl<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, raw, ttl).await
    }

    pub async fn get_slice<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
        self.get(key).await
    }

    pub async fn set_slice<T: Serialize>(
        &self,
        key: &str,
        values: &[T],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.set_with_ttl(key, values, ttl.unwrap_or(self.config.default_ttl))
            .await
    }

    /// Raw string variant; the value is stored unencoded.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.store
            .set(key, value.to_string(), ttl.unwrap_or(self.config.default_ttl))
            .await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<usize> {
        self.store.delete(keys).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.store.keys(pattern).await
    }

    /// Returns the cached value for `key`, or loads, caches and returns it.
    ///
    /// Only one caller loads a cold key at a time; the others wait and then
    /// read what it cached. Errors from `load` are returned and nothing is
    /// cached.
    pub async fn read_through<V, F, Fut>(&self, key: &str, load: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.lookup(key).await {
            return Ok(value);
        }

        let flight = Flight::join(&self.flights, key);
        let _turn = flight.lock.lock().await;

        // Someone else may have loaded it while we waited.
        if let Some(value) = self.lookup(key).await {
            return Ok(value);
        }

        tracing::trace!(key, "cache miss");
        let value = load().await?;
        if let Err(e) = self.set(key, &value).await {
            tracing::warn!(key, "failed to populate cache: {e}");
        }
        Ok(value)
    }

    /// Deletes every key in `keys`. Failures are logged, not returned.
    pub async fn invalidate(&self, keys: &[String]) {
        match self.store.delete(keys).await {
            Ok(deleted) => tracing::trace!(?keys, deleted, "cache invalidated"),
            Err(e) => tracing::error!(?keys, "cache invalidation failed: {e}"),
        }
    }

    /// A hit, or `None` on a miss or any cache error.
    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match self.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(key, "cache read failed, falling back to store: {e}");
                None
            }
        }
    }
}

/// Membership in the set of callers loading one key.
struct Flight {
    key: String,
    flights: Flights,
    lock: Arc<AsyncMutex<()>>,
}

impl Flight {
    fn join(flights: &Flights, key: &str) -> Self {
        let lock = Arc::clone(flights.lock().entry(key.to_string()).or_default());
        Self {
            key: key.to_string(),
            flights: Arc::clone(flights),
            lock,
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        // The map holds one reference and we hold another.
        if Arc::strong_count(&self.lock) <= 2 {
            flights.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Parcel {
        id: i64,
        weight: f64,
    }

    fn cache() -> (Cache, Arc<MemoryCache>) {
        let store = Arc::new(MemoryCache::new());
        let cache = Cache::new(store.clone(), CacheConfig::default()).expect("config");
        (cache, store)
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (cache, _) = cache();
        let loads = AtomicUsize::new(0);
        let counter = &loads;
        let load = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Parcel { id: 1, weight: 2.5 })
        };

        let first: Parcel = cache.read_through("parcel_1", load).await.expect("first");
        let second: Parcel = cache.read_through("parcel_1", load).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.get_string("parcel_1").await.expect("raw"),
            Some(r#"{"id":1,"weight":2.5}"#.to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_reads_load_once() {
        let (cache, _) = cache();
        let loads = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let loads = Arc::clone(&loads);
                tokio::spawn(async move {
                    cache
                        .read_through("parcel_9", || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(Parcel { id: 9, weight: 1.0 })
                        })
                        .await
                })
            })
            .collect();

        for reader in readers {
            let parcel = reader.await.expect("join").expect("read");
            assert_eq!(parcel.id, 9);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.flights.lock().is_empty());
    }

    #[tokio::test]
    async fn cache_failure_falls_back_to_loader() {
        let (cache, store) = cache();
        store.set_available(false);

        let parcel: Parcel = cache
            .read_through("parcel_2", || async { Ok(Parcel { id: 2, weight: 3.0 }) })
            .await
            .expect("read must not fail on cache errors");
        assert_eq!(parcel.id, 2);

        // Invalidation swallows the error.
        cache.invalidate(&["parcel_2".to_string()]).await;
    }

    #[tokio::test]
    async fn loader_error_is_returned_and_not_cached() {
        let (cache, _) = cache();
        let err = cache
            .read_through::<Parcel, _, _>("parcel_3", || async {
                Err(Error::NotFound {
                    entity: "parcel",
                    id: 3,
                })
            })
            .await
            .expect_err("loader failed");
        assert!(err.is_not_found());
        assert!(!cache.exists("parcel_3").await.expect("exists"));
    }

    #[tokio::test]
    async fn invalidate_deletes_every_listed_key() {
        let (cache, _) = cache();
        cache
            .set("order_1", &Parcel { id: 1, weight: 1.0 })
            .await
            .expect("set");
        cache
            .set_slice("all_orders", &[Parcel { id: 1, weight: 1.0 }], None)
            .await
            .expect("set");
        cache
            .set_string("user_orders_5", "[]", Some(Duration::from_secs(1)))
            .await
            .expect("set");

        cache.invalidate(&keys::order_keys(1, 5)).await;

        assert!(cache.keys("*").await.expect("keys").is_empty());
        assert_eq!(cache.get_slice::<Parcel>("all_orders").await.expect("get"), None);
    }
}
