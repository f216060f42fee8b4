//! Transactional store of record, backed by SQLite through `sqlx`.
//!
//! ## Structure
//!
//! - [`schema`] - how each entity maps onto its table.
//! - [`pool`] - connection pool settings, connecting and migrations.
//! - [`transaction`] - typed statements inside one open transaction.
//! - [`manager`] - leasing plus isolation-level transaction boundaries.
//! - [`repository`] - per-entity data access built on the manager.

pub mod manager;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod transaction;

pub use manager::{TransactionHandle, TransactionManager};
pub use pool::{PoolConfig, PoolStats};
pub use repository::Repository;
pub use schema::Entity;
pub use transaction::Transaction;

/// Isolation level a transaction is opened with.
///
/// Data access picks the level by the shape of the call:
/// - single-row writes use [`IsolationLevel::ReadCommitted`],
/// - single-row reads use [`IsolationLevel::RepeatableRead`],
/// - multi-row reads, deletes and scans use [`IsolationLevel::Serializable`].
///
/// SQLite has a single writer, so a level decides when the transaction takes
/// the write lock:
/// - Read-Committed and Serializable open with `BEGIN IMMEDIATE`. The lock is
///   held from the start, so no other commit can land while they run.
/// - Repeatable-Read opens with `BEGIN DEFERRED` and reads from the snapshot
///   taken by its first statement. Writing after someone else committed fails
///   with [`crate::Error::SerializationFailure`] (first committer wins).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub(crate) fn begin_statement(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted | IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            IsolationLevel::RepeatableRead => "BEGIN DEFERRED",
        }
    }
}

impl core::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable read"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{PoolConfig, TransactionManager};
    use core::time::Duration;
    use tempfile::TempDir;

    /// A manager over a fresh database in a temporary directory. The
    /// directory is removed when the returned guard drops.
    pub(crate) async fn manager(max_connections: u32) -> (TransactionManager, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PoolConfig::new(format!("sqlite://{}", dir.path().join("test.db").display()))
            .max_connections(max_connections)
            .connect_timeout(Duration::from_millis(200));
        let tm = TransactionManager::connect(&config).await.expect("connect");
        (tm, dir)
    }
}
