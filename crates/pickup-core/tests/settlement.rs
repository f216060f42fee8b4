mod common;

use async_trait::async_trait;
use common::database_url;
use core::time::Duration;
use pickup_core::{
    Error, Result,
    cache::{Cache, CacheConfig, CacheStore, MemoryCache, keys},
    notify::{ChangeEvent, DEFAULT_TOPIC, MemoryLog, Notifier, Operation},
    scheduler::{Scheduler, SchedulerConfig},
    service::{ServiceContext, Services, seed_reference_data},
    store::{PoolConfig, TransactionManager},
};
use std::sync::Arc;
use tokio::sync::{Notify, watch};

/// Memory cache whose deletes wait until the gate is opened.
struct GatedCache {
    inner: MemoryCache,
    open: watch::Sender<bool>,
    deleting: Notify,
}

impl GatedCache {
    fn new() -> Self {
        Self {
            inner: MemoryCache::new(),
            open: watch::Sender::new(true),
            deleting: Notify::new(),
        }
    }

    fn set_open(&self, open: bool) {
        self.open.send_replace(open);
    }
}

#[async_trait]
impl CacheStore for GatedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut open = self.open.subscribe();
        if !*open.borrow() {
            self.deleting.notify_one();
        }
        open.wait_for(|open| *open)
            .await
            .map_err(|_| Error::Cache {
                reason: "gate dropped".to_string(),
            })?;
        self.inner.delete(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.keys(pattern).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_call_still_invalidates_and_notifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transactions = TransactionManager::connect(&PoolConfig::new(database_url(&dir)))
        .await
        .expect("connect");
    let store = Arc::new(GatedCache::new());
    let cache = Cache::new(store.clone(), CacheConfig::default()).expect("cache");
    let log = Arc::new(MemoryLog::new());
    let ctx = ServiceContext::new(
        Scheduler::new(SchedulerConfig::new(1)).expect("scheduler"),
        transactions,
        cache,
        Notifier::new(log.clone(), DEFAULT_TOPIC),
    );
    seed_reference_data(&ctx).await.expect("seed");
    let services = Services::new(ctx.clone());

    let user = services.users.create_user("uma").await.expect("user");
    services.users.get_user(user.user_id).await.expect("warm");
    assert!(store.exists(&keys::user(user.user_id)).await.expect("cached"));

    store.set_open(false);
    let caller = tokio::spawn({
        let users = services.users.clone();
        async move { users.update_user(user.user_id, "ursula").await }
    });

    // Invalidation starts only after the commit.
    store.deleting.notified().await;
    caller.abort();
    assert!(caller.await.expect_err("aborted").is_cancelled());

    store.set_open(true);
    ctx.scheduler.wait().await.expect("drained");

    assert!(!store.exists(&keys::user(user.user_id)).await.expect("exists"));
    assert!(!store.exists(keys::ALL_USERS).await.expect("exists"));
    assert_eq!(
        services.users.get_username(user.user_id).await.expect("read"),
        "ursula"
    );
    let updates: Vec<_> = log
        .records(DEFAULT_TOPIC)
        .iter()
        .map(|record| ChangeEvent::decode(&record.payload).expect("event"))
        .filter(|event| event.operation == Operation::Update)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].subject_id, user.user_id);
}
