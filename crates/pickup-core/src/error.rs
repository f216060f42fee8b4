//! Error types for the pickup backend.
//!
//! This module defines the central [`Error`] enum shared by the scheduler, the
//! store, the cache facade, the change notifier and the entity services. It
//! implements `From<Error>` for `tonic::Status` so that a transport layer can
//! propagate failures to clients with appropriate status codes.
//!
//! ## Error Cases
//! - Resource exhaustion: `PoolExhausted`, `ConnectTimeout`,
//!   `ServiceShutdown`, `ChannelError`, `TaskFailed`.
//! - Store: `NotFound`, `NameNotFound`, `ConstraintViolation`,
//!   `SerializationFailure`, `Database`.
//! - Cache and encoding: `Cache`, `Serialization`.
//! - Notification: `Notify`.
//! - Configuration: `InvalidWorkerCount`, `InvalidConfig`.
//! - Domain rules: `AlreadyIssued`, `NotInStorage`, `NotIssued`, `StorageExpired`,
//!   `ReturnWindowClosed`, `WeightExceeded`, `ExpirationInPast`,
//!   `InvalidRequest`.
//! - `Context`: any of the above wrapped with the operation that failed.

use sqlx::error::ErrorKind;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the pickup backend.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// No pooled connection became available within the connect timeout.
    #[error("Connection pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    /// A fresh connection could not be opened within the connect timeout.
    #[error("Timed out connecting to the database after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// The scheduler no longer accepts work.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A submitted task panicked or was dropped before producing a value.
    #[error("Task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A reference row looked up by its unique name does not exist.
    #[error("{entity} '{name}' not found")]
    NameNotFound { entity: &'static str, name: String },

    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    /// A concurrent commit invalidated this transaction's snapshot.
    #[error("Could not serialize access: {reason}")]
    SerializationFailure { reason: String },

    /// Any other failure reported by the database driver.
    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Cache error: {reason}")]
    Cache { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Notification error: {reason}")]
    Notify { reason: String },

    #[error("Invalid worker count {count}: at least one worker is required")]
    InvalidWorkerCount { count: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Order {order_id} has already been issued")]
    AlreadyIssued { order_id: i64 },

    /// The order has left storage through another path, such as a return.
    #[error("Order {order_id} is no longer waiting for pickup")]
    NotInStorage { order_id: i64 },

    #[error("Order {order_id} has not been issued")]
    NotIssued { order_id: i64 },

    #[error("Storage period of order {order_id} has expired")]
    StorageExpired { order_id: i64 },

    #[error("Order {order_id} was issued more than 48 hours ago")]
    ReturnWindowClosed { order_id: i64 },

    #[error("Weight {weight} exceeds the packaging limit of {max_weight}")]
    WeightExceeded { weight: f64, max_weight: f64 },

    #[error("Expiration date is in the past")]
    ExpirationInPast,

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The wrapped error annotated with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `self` with the name of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any [`Error::Context`] layers.
    pub fn root(&self) -> &Error {
        let mut err = self;
        while let Error::Context { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Error::NotFound { .. } | Error::NameNotFound { .. }
        )
    }

    pub fn is_serialization_failure(&self) -> bool {
        matches!(self.root(), Error::SerializationFailure { .. })
    }
}

/// Adds operation context to a [`Result`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Error::PoolExhausted {
                reason: "timed out waiting for a connection".to_string(),
            },
            sqlx::Error::PoolClosed => Error::ServiceShutdown,
            sqlx::Error::Database(db) => {
                let reason = db.message().to_string();
                match db.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => Error::ConstraintViolation { reason },
                    _ if is_lock_conflict(db.code().as_deref()) => {
                        Error::SerializationFailure { reason }
                    }
                    _ => Error::Database { reason },
                }
            }
            e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
                Error::Serialization {
                    reason: e.to_string(),
                }
            }
            other => Error::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Database {
            reason: format!("migration failed: {err}"),
        }
    }
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED`, including extended codes such as
/// `SQLITE_BUSY_SNAPSHOT`: another connection won the write lock or committed
/// past this transaction's snapshot.
fn is_lock_conflict(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err.root() {
            Error::PoolExhausted { .. }
            | Error::ConnectTimeout { .. }
            | Error::ServiceShutdown => Status::unavailable(message),
            Error::NotFound { .. } | Error::NameNotFound { .. } => Status::not_found(message),
            Error::ConstraintViolation { .. } => Status::already_exists(message),
            Error::SerializationFailure { .. } => Status::aborted(message),
            Error::AlreadyIssued { .. }
            | Error::NotInStorage { .. }
            | Error::NotIssued { .. }
            | Error::StorageExpired { .. }
            | Error::ReturnWindowClosed { .. } => Status::failed_precondition(message),
            Error::WeightExceeded { .. }
            | Error::ExpirationInPast
            | Error::InvalidWorkerCount { .. }
            | Error::InvalidRequest { .. } => Status::invalid_argument(message),
            _ => Status::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn root_skips_context_layers() {
        let err = Error::NotFound {
            entity: "order",
            id: 7,
        }
        .context("read order")
        .context("issue order");

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "issue order: read order: order with id 7 not found");
    }

    #[test]
    fn status_code_follows_root_cause() {
        let status: Status = Error::AlreadyIssued { order_id: 3 }
            .context("issue order")
            .into();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let status: Status = Error::PoolExhausted {
            reason: "busy".into(),
        }
        .into();
        assert_eq!(status.code(), Code::Unavailable);

        let status: Status = Error::NotInStorage { order_id: 4 }.into();
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn pool_errors_map_onto_resource_exhaustion() {
        assert!(matches!(
            Error::from(sqlx::Error::PoolTimedOut),
            Error::PoolExhausted { .. }
        ));
        assert!(matches!(
            Error::from(sqlx::Error::PoolClosed),
            Error::ServiceShutdown
        ));
    }

    #[test]
    fn busy_and_locked_codes_are_lock_conflicts() {
        // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
        for code in ["5", "6", "517"] {
            assert!(is_lock_conflict(Some(code)), "{code}");
        }
        // SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_lock_conflict(Some("2067")));
        assert!(!is_lock_conflict(None));
    }
}
