//! Entity services.
//!
//! Every service follows the same protocol:
//!
//! - Mutations are submitted to the shared [`Scheduler`] and awaited. The task
//!   runs one transaction; once it commits, the same task invalidates every
//!   cache key that could hold the mutated rows and then publishes a
//!   [`ChangeEvent`]. A caller that stops waiting cannot skip either step. A
//!   failed mutation is reported on the event topic as an [`Operation::Error`]
//!   event and returned.
//! - Reads go through the cache on the calling task.
//!
//! A notification that cannot be confirmed fails the call, but the committed
//! mutation and its invalidation stand.

mod order;
mod packaging;
mod reason;
mod returns;
mod seed;
mod status;
mod user;

pub use order::OrderService;
pub use packaging::PackagingService;
pub use reason::ReturnReasonService;
pub use returns::ReturnService;
pub use seed::seed_reference_data;
pub use status::StatusService;
pub use user::UserService;

use crate::{
    Error, Result,
    cache::Cache,
    metrics::Metrics,
    notify::{ChangeEvent, Notifier, Operation},
    scheduler::Scheduler,
    store::{Entity, IsolationLevel, Transaction, TransactionManager},
};
use futures::future::BoxFuture;

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct ServiceContext {
    pub scheduler: Scheduler,
    pub transactions: TransactionManager,
    pub cache: Cache,
    pub notifier: Notifier,
    pub metrics: Metrics,
}

/// What a committed mutation leaves behind: the cache keys that may now be
/// stale and the event announcing it.
pub(crate) struct Settlement {
    pub(crate) keys: Vec<String>,
    pub(crate) event: ChangeEvent,
}

impl Settlement {
    pub(crate) fn new(keys: Vec<String>, event: ChangeEvent) -> Self {
        Self { keys, event }
    }
}

impl ServiceContext {
    pub fn new(
        scheduler: Scheduler,
        transactions: TransactionManager,
        cache: Cache,
        notifier: Notifier,
    ) -> Self {
        Self {
            scheduler,
            transactions,
            cache,
            notifier,
            metrics: Metrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs `statements` in one transaction on the scheduler, settles the
    /// commit with whatever `settle` derives from the result, and waits for
    /// all of it. Failures are reported as `operation` on `subject_id`.
    pub(crate) async fn execute<T, F, S>(
        &self,
        operation: Operation,
        subject_id: i64,
        level: IsolationLevel,
        context: String,
        statements: F,
        settle: S,
    ) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, Result<T>> + Send + 'static,
        S: FnOnce(&T) -> Settlement + Send + 'static,
        T: Send + 'static,
    {
        let tm = self.transactions.clone();
        let cache = self.cache.clone();
        let notifier = self.notifier.clone();
        let scheduled = self
            .scheduler
            .run(async move {
                let value = match tm.run(level, &context, statements).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(%operation, subject_id, "{e}");
                        notifier.report_error(operation, subject_id, &e).await;
                        return Err(e);
                    }
                };
                let Settlement { keys, event } = settle(&value);
                cache.invalidate(&keys).await;
                notifier.send(&event).await?;
                Ok(value)
            })
            .await;

        match scheduled {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%operation, subject_id, "{e}");
                self.notifier.report_error(operation, subject_id, &e).await;
                Err(e)
            }
        }
    }
}

/// Every entity service over one [`ServiceContext`].
#[derive(Clone)]
pub struct Services {
    pub users: UserService,
    pub statuses: StatusService,
    pub packaging: PackagingService,
    pub reasons: ReturnReasonService,
    pub orders: OrderService,
    pub returns: ReturnService,
}

impl Services {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            users: UserService::new(ctx.clone()),
            statuses: StatusService::new(ctx.clone()),
            packaging: PackagingService::new(ctx.clone()),
            reasons: ReturnReasonService::new(ctx.clone()),
            orders: OrderService::new(ctx.clone()),
            returns: ReturnService::new(ctx),
        }
    }
}

/// Looks up a reference row by its unique `column` inside `tx`.
pub(crate) async fn require_named<T: Entity>(
    tx: &mut Transaction,
    column: &'static str,
    name: &str,
) -> Result<T> {
    tx.find_by::<T, _>(column, name.to_string())
        .await?
        .ok_or_else(|| Error::NameNotFound {
            entity: T::NAME,
            name: name.to_string(),
        })
}

/// Trims `value` and rejects it when empty.
pub(crate) fn non_empty(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidRequest {
            reason: format!("{field} must not be empty"),
        });
    }
    Ok(value.to_string())
}
