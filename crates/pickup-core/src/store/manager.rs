//! Connection leasing and transaction boundaries.
//!
//! A [`TransactionHandle`] is an open transaction on a leased connection.
//! Both [`TransactionHandle::commit`] and [`TransactionHandle::rollback`]
//! consume the handle, so it is finalised exactly once, and the connection
//! returns to the pool on every path, including when finalisation itself
//! fails. Dropping an unfinalised handle rolls it back.

use super::{IsolationLevel, PoolConfig, PoolStats, pool, transaction::Transaction};
use crate::{Result, error::ResultExt};
use futures::future::BoxFuture;
use sqlx::SqlitePool;

pub struct TransactionHandle {
    tx: Transaction,
}

impl TransactionHandle {
    pub fn level(&self) -> IsolationLevel {
        self.tx.level()
    }

    pub async fn commit(self) -> Result<()> {
        let level = self.tx.level();
        self.tx.into_inner().commit().await?;
        tracing::trace!(%level, "transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let level = self.tx.level();
        self.tx.into_inner().rollback().await?;
        tracing::trace!(%level, "transaction rolled back");
        Ok(())
    }
}

impl core::ops::Deref for TransactionHandle {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.tx
    }
}

impl core::ops::DerefMut for TransactionHandle {
    fn deref_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }
}

/// Opens and finalises transactions over a shared connection pool.
#[derive(Clone)]
pub struct TransactionManager {
    pool: SqlitePool,
}

impl TransactionManager {
    /// Opens the database described by `config` and applies pending
    /// migrations.
    pub async fn connect(config: &PoolConfig) -> Result<Self> {
        let pool = pool::connect(config).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats::of(&self.pool)
    }

    /// Leases a connection and opens a read-write transaction at `level`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::PoolExhausted`] if no connection frees up within the
    ///   pool's connect timeout.
    /// - [`crate::Error::ServiceShutdown`] once the pool is closed.
    pub async fn begin(&self, level: IsolationLevel) -> Result<TransactionHandle> {
        let inner = self.pool.begin_with(level.begin_statement()).await?;
        tracing::trace!(%level, "transaction started");
        Ok(TransactionHandle {
            tx: Transaction::new(inner, level),
        })
    }

    pub async fn commit(&self, handle: TransactionHandle) -> Result<()> {
        handle.commit().await
    }

    pub async fn rollback(&self, handle: TransactionHandle) -> Result<()> {
        handle.rollback().await
    }

    /// Runs `statements` in one transaction at `level`.
    ///
    /// Commits when `statements` succeeds and rolls back when it fails. A
    /// failed rollback is logged and never replaces the statement error.
    /// Errors are wrapped with `context`.
    ///
    /// ```ignore
    /// let user = tm
    ///     .run(IsolationLevel::RepeatableRead, "get user", move |tx| {
    ///         Box::pin(async move { tx.require::<User>(id).await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, level: IsolationLevel, context: &str, statements: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, Result<T>>,
    {
        let mut handle = self.begin(level).await.context(context)?;

        match statements(&mut handle.tx).await {
            Ok(value) => {
                handle
                    .commit()
                    .await
                    .with_context(|| format!("{context}: commit"))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = handle.rollback().await {
                    tracing::warn!("{context}: rollback failed: {rollback_err}");
                }
                Err(err.context(context))
            }
        }
    }

    /// Stops handing out connections and waits until every leased one is
    /// returned and closed.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error,
        model::{Status, User},
        store::testing,
    };
    use chrono::Utc;
    use core::time::Duration;

    /// Stats once every dropped lease has made its way back to the pool.
    async fn settled(tm: &TransactionManager) -> PoolStats {
        for _ in 0..100 {
            let stats = tm.pool_stats();
            if stats.active == 0 {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tm.pool_stats()
    }

    #[tokio::test]
    async fn failed_statement_rolls_back_and_releases_connection() {
        let (tm, _dir) = testing::manager(2).await;
        let status = tm
            .run(IsolationLevel::ReadCommitted, "create status", |tx| {
                Box::pin(async move {
                    tx.insert(Status {
                        status_id: 0,
                        status_name: "Создан".into(),
                    })
                    .await
                })
            })
            .await
            .expect("create");

        let status_id = status.status_id;
        let err = tm
            .run(IsolationLevel::ReadCommitted, "rename status", move |tx| {
                Box::pin(async move {
                    tx.update(&Status {
                        status_id,
                        status_name: "Выдан".into(),
                    })
                    .await?;
                    let user = User {
                        user_id: 0,
                        username: "x".into(),
                        created_at: Utc::now(),
                    };
                    tx.insert(user.clone()).await?;
                    tx.insert(user).await
                })
            })
            .await
            .expect_err("duplicate username");

        assert!(matches!(err.root(), Error::ConstraintViolation { .. }));
        assert!(err.to_string().starts_with("rename status: "));

        let unchanged = tm
            .run(IsolationLevel::RepeatableRead, "get status", move |tx| {
                Box::pin(async move { tx.require::<Status>(status_id).await })
            })
            .await
            .expect("get");
        assert_eq!(unchanged.status_name, "Создан");

        let stats = settled(&tm).await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, stats.total);
    }

    #[tokio::test]
    async fn exhausted_pool_fails_after_the_connect_timeout() {
        let (tm, _dir) = testing::manager(1).await;
        let mut first = tm.begin(IsolationLevel::RepeatableRead).await.expect("begin");

        // Only one connection: `first` holds it.
        let err = tm
            .run(IsolationLevel::ReadCommitted, "setup", |_| {
                Box::pin(async { Ok(()) })
            })
            .await
            .expect_err("no connection left");
        assert!(matches!(err.root(), Error::PoolExhausted { .. }), "{err}");

        first
            .insert(Status {
                status_id: 0,
                status_name: "a".into(),
            })
            .await
            .expect("insert");
        tm.commit(first).await.expect("commit");

        tm.begin(IsolationLevel::ReadCommitted)
            .await
            .expect("connection is back");
    }

    #[tokio::test]
    async fn dropped_handle_is_rolled_back() {
        let (tm, _dir) = testing::manager(1).await;
        {
            let mut handle = tm.begin(IsolationLevel::ReadCommitted).await.expect("begin");
            handle
                .insert(Status {
                    status_id: 0,
                    status_name: "lost".into(),
                })
                .await
                .expect("insert");
        }

        let statuses = tm
            .run(IsolationLevel::Serializable, "list statuses", |tx| {
                Box::pin(async move { tx.scan::<Status>().await })
            })
            .await
            .expect("scan");
        assert!(statuses.is_empty());
        assert_eq!(settled(&tm).await.active, 0);
    }

    #[tokio::test]
    async fn closed_pool_keeps_no_connections() {
        let (tm, _dir) = testing::manager(2).await;
        let handle = tm.begin(IsolationLevel::ReadCommitted).await.expect("begin");

        let closing = tokio::spawn({
            let tm = tm.clone();
            async move { tm.close().await }
        });
        tokio::task::yield_now().await;

        // A lease finished after close is closed, not parked as idle.
        handle.commit().await.expect("commit");
        closing.await.expect("join");

        let stats = tm.pool_stats();
        assert_eq!((stats.total, stats.idle, stats.active), (0, 0, 0));
        let err = tm
            .begin(IsolationLevel::ReadCommitted)
            .await
            .err()
            .expect("closed pool");
        assert!(matches!(err, Error::ServiceShutdown), "{err}");
    }
}
