use crate::{
    Result,
    cache::{Cache, CacheConfig, MemoryCache},
    notify::{DEFAULT_TOPIC, MemoryLog, Notifier},
    scheduler::{Scheduler, SchedulerConfig},
    service::{ServiceContext, Services, seed_reference_data},
    metrics::Metrics,
    store::{PoolConfig, TransactionManager},
    sweep::ExpirationSweep,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    /// Topic change events are published to.
    pub events_topic: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            events_topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

/// A fully wired backend: SQLite store of record plus in-process cache and
/// event log.
pub struct Backend {
    cache_store: Arc<MemoryCache>,
    event_log: Arc<MemoryLog>,
    ctx: ServiceContext,
    services: Services,
}

impl Backend {
    /// Opens the database and builds every component from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(config: BackendConfig) -> Result<Self> {
        let transactions = TransactionManager::connect(&config.pool).await?;
        let cache_store = Arc::new(MemoryCache::new());
        let cache = Cache::new(cache_store.clone(), config.cache)?;
        let event_log = Arc::new(MemoryLog::new());
        let notifier = Notifier::new(event_log.clone(), config.events_topic);
        let scheduler = Scheduler::new(config.scheduler)?;

        let ctx = ServiceContext::new(scheduler, transactions, cache, notifier);
        let services = Services::new(ctx.clone());
        Ok(Self {
            cache_store,
            event_log,
            ctx,
            services,
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn metrics(&self) -> &Metrics {
        &self.ctx.metrics
    }

    pub fn cache_store(&self) -> &Arc<MemoryCache> {
        &self.cache_store
    }

    pub fn event_log(&self) -> &Arc<MemoryLog> {
        &self.event_log
    }

    pub fn sweep(&self) -> ExpirationSweep {
        ExpirationSweep::new(self.ctx.clone())
    }

    pub async fn seed(&self) -> Result<usize> {
        seed_reference_data(&self.ctx).await
    }

    /// Drains the scheduler and then closes the connection pool.
    pub async fn shutdown(&self) -> Result<()> {
        let drained = self.ctx.scheduler.close().await;
        self.ctx.transactions.close().await;
        tracing::info!(pool = %self.ctx.transactions.pool_stats(), "backend stopped");
        drained
    }
}
