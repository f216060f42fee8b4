//! Connection pool settings and database bootstrap.

use crate::{Error, Result};
use core::{fmt, str::FromStr, time::Duration};
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

/// Default upper bound on open connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// `sqlite://` URL of the database file. Created when missing.
    pub url: String,
    pub max_connections: u32,
    /// How long a caller may wait for a connection, and how long opening the
    /// database may take.
    pub connect_timeout: Duration,
    /// Idle connections are closed after this long. `None` keeps them.
    pub idle_timeout: Option<Duration>,
    /// Connections are retired after this long. `None` keeps them.
    pub max_lifetime: Option<Duration>,
    /// How long a statement waits for another connection's write lock.
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new("sqlite://pickup.db")
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            max_lifetime: None,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidConfig {
                reason: "database url must not be empty".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig {
                reason: "pool needs at least one connection".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "connect timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Opens the pool and brings the schema up to date.
///
/// # Errors
///
/// - [`Error::InvalidConfig`] if `config` does not validate.
/// - [`Error::ConnectTimeout`] if the database cannot be opened within the
///   connect timeout.
/// - [`Error::Database`] if the database cannot be opened or a migration
///   fails.
pub(crate) async fn connect(config: &PoolConfig) -> Result<SqlitePool> {
    config.validate()?;

    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let connecting = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options);
    let pool = tokio::time::timeout(config.connect_timeout, connecting)
        .await
        .map_err(|_| Error::ConnectTimeout {
            timeout_ms: u64::try_from(config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

    MIGRATOR.run(&pool).await?;
    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        "database ready (SQLite WAL)"
    );
    Ok(pool)
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, leased or idle.
    pub total: u32,
    pub idle: u32,
    pub active: u32,
    pub max: u32,
}

impl PoolStats {
    pub(crate) fn of(pool: &SqlitePool) -> Self {
        let total = pool.size();
        let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(total);
        Self {
            total,
            idle,
            active: total - idle,
            max: pool.options().get_max_connections(),
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} active, {} idle, {}/{} open",
            self.active, self.idle, self.total, self.max
        )
    }
}
