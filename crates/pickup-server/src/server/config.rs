use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use pickup_core::{
    BackendConfig,
    cache::CacheConfig,
    notify::{ConsumerConfig, DEFAULT_TOPIC, RetryPolicy},
    scheduler::{DEFAULT_QUEUE_CAPACITY, SchedulerConfig},
    store::PoolConfig,
};
use std::net::SocketAddr;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `pickup-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for a single pickup point.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pickup-server",
    version,
    about = "Order management backend for a parcel pickup point"
)]
pub struct CliArgs {
    /// Address the health endpoint listens on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Number of executors draining the task queue.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 2)]
    pub num_workers: usize,

    /// Capacity of the task queue. Callers wait once it is full.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Seconds to wait for queued tasks to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// SQLite database the backend stores its records in. Created on first
    /// start.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL", default_value_t = String::from("sqlite://pickup.db"))]
    pub database_url: String,

    /// Upper bound on open database connections.
    ///
    /// Environment variable: `DB_MAX_CONNECTIONS`
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    /// Seconds a caller may wait for a database connection.
    ///
    /// Environment variable: `DB_CONNECT_TIMEOUT`
    #[arg(long, env = "DB_CONNECT_TIMEOUT", default_value_t = 10)]
    pub db_connect_timeout: u64,

    /// Seconds an idle connection is kept before it is closed. `0` keeps idle
    /// connections forever.
    ///
    /// Environment variable: `DB_IDLE_TIMEOUT`
    #[arg(long, env = "DB_IDLE_TIMEOUT", default_value_t = 300)]
    pub db_idle_timeout: u64,

    /// Seconds a cached entry lives.
    ///
    /// Environment variable: `CACHE_TTL`
    #[arg(long, env = "CACHE_TTL", default_value_t = 600)]
    pub cache_ttl: u64,

    /// Topic change events are published to and consumed from.
    ///
    /// Environment variable: `EVENTS_TOPIC`
    #[arg(long, env = "EVENTS_TOPIC", default_value_t = String::from(DEFAULT_TOPIC))]
    pub events_topic: String,

    /// Consumer group of the notification consumer.
    ///
    /// Environment variable: `CONSUMER_GROUP`
    #[arg(long, env = "CONSUMER_GROUP", default_value_t = String::from("notifier_group"))]
    pub consumer_group: String,

    /// Retries of a failed event before it is dropped.
    ///
    /// Environment variable: `CONSUMER_MAX_RETRIES`
    #[arg(long, env = "CONSUMER_MAX_RETRIES", default_value_t = 3)]
    pub consumer_max_retries: u32,

    /// Milliseconds between retries of a failed event.
    ///
    /// Environment variable: `CONSUMER_RETRY_DELAY_MS`
    #[arg(long, env = "CONSUMER_RETRY_DELAY_MS", default_value_t = 2_000)]
    pub consumer_retry_delay_ms: u64,

    /// Topic that receives events which exhausted their retries. Unset drops
    /// them.
    ///
    /// Environment variable: `DEAD_LETTER_TOPIC`
    #[arg(long, env = "DEAD_LETTER_TOPIC")]
    pub dead_letter_topic: Option<String>,

    /// Seconds between expiration sweeps.
    ///
    /// Environment variable: `SWEEP_INTERVAL`
    #[arg(long, env = "SWEEP_INTERVAL", default_value_t = 600)]
    pub sweep_interval: u64,

    /// Install reference statuses, reasons and packaging at startup.
    ///
    /// Environment variable: `SEED`
    #[arg(long, env = "SEED", default_value_t = true, action = clap::ArgAction::Set)]
    pub seed: bool,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub backend: BackendConfig,
    pub consumer: ConsumerConfig,
    pub sweep_interval: Duration,
    pub seed: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }
        if args.database_url.trim().is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if args.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than 0");
        }
        if args.cache_ttl == 0 {
            bail!("CACHE_TTL must be greater than 0");
        }
        if args.sweep_interval == 0 {
            bail!("SWEEP_INTERVAL must be greater than 0");
        }
        if args.dead_letter_topic.as_deref() == Some(args.events_topic.as_str()) {
            bail!(
                "DEAD_LETTER_TOPIC must differ from EVENTS_TOPIC ({})",
                args.events_topic
            );
        }

        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("invalid SERVER_ADDR {:?}", args.server_addr))?;

        let idle_timeout = match args.db_idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let backend = BackendConfig {
            scheduler: SchedulerConfig::new(args.num_workers)
                .queue_capacity(args.queue_capacity)
                .shutdown_timeout(Duration::from_secs(args.shutdown_timeout)),
            pool: PoolConfig::new(args.database_url)
                .max_connections(args.db_max_connections)
                .connect_timeout(Duration::from_secs(args.db_connect_timeout))
                .idle_timeout(idle_timeout),
            cache: CacheConfig::new(Duration::from_secs(args.cache_ttl)),
            events_topic: args.events_topic.clone(),
        };

        let retry = RetryPolicy {
            max_retries: args.consumer_max_retries,
            delay: Duration::from_millis(args.consumer_retry_delay_ms),
        };
        retry.validate()?;
        let mut consumer =
            ConsumerConfig::new(args.events_topic, args.consumer_group).with_retry(retry);
        if let Some(topic) = args.dead_letter_topic {
            consumer = consumer.with_dead_letter_topic(topic);
        }

        Ok(Self {
            server_addr,
            backend,
            consumer,
            sweep_interval: Duration::from_secs(args.sweep_interval),
            seed: args.seed,
            log_format: args.log_format,
        })
    }
}
