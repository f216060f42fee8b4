//! Change notification over a durable event log.
//!
//! Services publish a [`ChangeEvent`] after each committed mutation through a
//! [`Notifier`], which waits until the log acknowledges the record. A
//! [`Consumer`] reads the topic as part of a consumer group, hands each event
//! to an [`EventHandler`] and retries failures per its [`RetryPolicy`]. A
//! record that still fails is committed and dropped (or dead-lettered), so
//! delivery is at least once and handlers must be idempotent.

mod consumer;
mod event;
mod log;
mod producer;

pub use consumer::{
    Consumer, ConsumerConfig, EventHandler, LoggingHandler, Outcome, RetryPolicy,
};
pub use event::{ChangeEvent, Operation};
pub use log::{EventLog, MemoryLog, Record};
pub use producer::Notifier;

/// Topic change events are published to unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "pvz.events-log";
