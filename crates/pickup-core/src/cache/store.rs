use crate::{Error, Result};
use async_trait::async_trait;
use core::time::Duration;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::time::Instant;

/// A shared key-value store holding serialized values with a TTL.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Deletes `keys` and returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Live keys matching a glob `pattern` (`*` and `?` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`CacheStore`]. Entries expire lazily at their deadline.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail, as an unreachable cache server would.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(Error::Cache {
                reason: "cache server unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let live = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => (entry.expires_at > Instant::now()).then(|| entry.value.clone()),
        };
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                // Let the last `*` swallow one more byte.
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"order_*", b"order_42"));
        assert!(glob_match(b"*_orders_*", b"user_orders_7"));
        assert!(glob_match(b"status_?", b"status_1"));
        assert!(!glob_match(b"status_?", b"status_12"));
        assert!(!glob_match(b"order_*", b"all_orders"));
        assert!(glob_match(b"*", b""));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_at_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("order_1", "{}".into(), Duration::from_secs(10))
            .await
            .expect("set");
        assert!(cache.exists("order_1").await.expect("exists"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("order_1").await.expect("get"), None);
        assert!(cache.keys("*").await.expect("keys").is_empty());
    }

    #[tokio::test]
    async fn unavailable_cache_fails_every_operation() {
        let cache = MemoryCache::new();
        cache.set_available(false);
        assert!(matches!(
            cache.get("k").await,
            Err(Error::Cache { .. })
        ));
        assert!(cache.delete(&["k".to_string()]).await.is_err());
    }
}
