//! Periodic conversion of expired orders into returns.
//!
//! Each pass loads the orders whose expiration date has passed and submits
//! one scheduler task per order still waiting for pickup. The task re-checks
//! the order in its own Serializable transaction, so running a pass twice, or
//! racing one with an issue, never converts an order twice. After a commit the
//! same task invalidates the order's cache keys and publishes the change.

use crate::{
    Error, Result,
    cache::keys,
    metrics,
    model::{Order, Return, ReturnReason, Status, reason, status},
    notify::{ChangeEvent, Operation},
    scheduler::TaskHandle,
    service::ServiceContext,
    store::{IsolationLevel, Repository},
};
use chrono::{DateTime, Utc};
use core::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired orders loaded.
    pub examined: usize,
    pub converted: usize,
    /// Orders already issued, returned or otherwise no longer eligible.
    pub skipped: usize,
    pub failed: usize,
}

/// Status and reason ids a pass works with.
#[derive(Debug, Clone, Copy)]
struct Refs {
    created: i64,
    returned: i64,
    expired: i64,
}

#[derive(Clone)]
pub struct ExpirationSweep {
    ctx: ServiceContext,
    orders: Repository<Order>,
    statuses: Repository<Status>,
    reasons: Repository<ReturnReason>,
}

impl ExpirationSweep {
    pub fn new(ctx: ServiceContext) -> Self {
        let tm = ctx.transactions.clone();
        Self {
            ctx,
            orders: Repository::new(tm.clone()),
            statuses: Repository::new(tm.clone()),
            reasons: Repository::new(tm),
        }
    }

    /// Runs one pass and waits for every conversion it submitted.
    ///
    /// Failures to convert single orders are counted and reported; only a
    /// failure to start the pass is returned.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        match self.sweep(Utc::now()).await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!("expiration sweep failed: {e}");
                self.ctx.notifier.report_error(Operation::Return, 0, &e).await;
                Err(e)
            }
        }
    }

    /// Runs a pass every `period` until `token` is cancelled.
    pub fn spawn(self, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_secs = period.as_secs(), "expiration sweep started");
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    pass = self.run_once() => {
                        if let Ok(report) = pass {
                            tracing::info!(?report, "expiration sweep finished");
                        }
                    }
                }
            }
            tracing::info!("expiration sweep stopped");
        })
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.orders.expired(now).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }
        let refs = self.refs().await?;

        let mut pending: Vec<(i64, TaskHandle<Result<Option<Order>>>)> = Vec::new();
        for order in expired {
            if order.status_id != refs.created || order.issue_date.is_some() {
                report.skipped += 1;
                continue;
            }
            let ctx = self.ctx.clone();
            let order_id = order.order_id;
            let handle = self
                .ctx
                .scheduler
                .submit(async move { convert(&ctx, order_id, refs, now).await })
                .await?;
            pending.push((order_id, handle));
        }

        for (order_id, handle) in pending {
            match handle.await.and_then(|converted| converted) {
                Ok(Some(_)) => report.converted += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(order_id, "failed to convert expired order: {e}");
                    self.ctx
                        .notifier
                        .report_error(Operation::Return, order_id, &e)
                        .await;
                }
            }
        }
        Ok(report)
    }

    async fn refs(&self) -> Result<Refs> {
        let status_id = |name: &'static str| async move {
            self.statuses
                .by_name(name)
                .await?
                .map(|s| s.status_id)
                .ok_or(Error::NameNotFound {
                    entity: "status",
                    name: name.to_string(),
                })
        };
        let expired = self
            .reasons
            .by_reason(reason::STORAGE_EXPIRED)
            .await?
            .map(|r| r.reason_id)
            .ok_or(Error::NameNotFound {
                entity: "return reason",
                name: reason::STORAGE_EXPIRED.to_string(),
            })?;
        Ok(Refs {
            created: status_id(status::CREATED).await?,
            returned: status_id(status::RETURN).await?,
            expired,
        })
    }
}

/// Converts `order_id` if it is still waiting for pickup past its expiration
/// date, then settles the conversion. Returns the updated order, or `None`
/// when it was no longer eligible.
async fn convert(
    ctx: &ServiceContext,
    order_id: i64,
    refs: Refs,
    now: DateTime<Utc>,
) -> Result<Option<Order>> {
    let converted = ctx
        .transactions
        .run(
            IsolationLevel::Serializable,
            &format!("convert expired order {order_id}"),
            move |tx| {
                Box::pin(async move {
                    let Some(mut order) = tx.get::<Order>(order_id).await? else {
                        return Ok(None);
                    };
                    let eligible = order.status_id == refs.created
                        && order.issue_date.is_none()
                        && order.expiration_date < now;
                    if !eligible {
                        return Ok(None);
                    }

                    tx.insert(Return::for_order(&order, refs.expired, refs.returned, now))
                        .await?;
                    order.status_id = refs.returned;
                    tx.update(&order).await.map(Some)
                })
            },
        )
        .await?;

    if let Some(order) = &converted {
        ctx.metrics.return_created(metrics::EXPIRED);
        let mut stale = keys::order_keys(order.order_id, order.user_id);
        stale.extend(keys::return_keys(order.order_id, order.user_id));
        ctx.cache.invalidate(&stale).await;
        ctx.notifier
            .publish(ChangeEvent::new(
                Operation::Return,
                order.order_id,
                format!("Return created for expired order {}", order.order_id),
            ))
            .await;
    }
    Ok(converted)
}
