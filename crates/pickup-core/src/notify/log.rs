use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

/// One entry of a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// A durable, ordered, multi-topic append log with consumer groups.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Appends `payload` to `topic` and returns its offset once the record is
    /// durable.
    async fn append(&self, topic: &str, payload: Vec<u8>) -> Result<u64>;

    /// Waits for the first record of `topic` that `group` has not committed.
    ///
    /// Until that record is committed, every fetch by the group returns it
    /// again.
    async fn fetch(&self, topic: &str, group: &str) -> Result<Record>;

    /// Marks every record of `topic` up to and including `offset` as consumed
    /// by `group`.
    async fn commit(&self, topic: &str, group: &str, offset: u64) -> Result<()>;

    /// Offset of the next record `group` will receive from `topic`.
    async fn position(&self, topic: &str, group: &str) -> Result<u64>;
}

/// In-process [`EventLog`].
#[derive(Default)]
pub struct MemoryLog {
    topics: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    positions: Mutex<HashMap<(String, String), u64>>,
    appended: Notify,
    unavailable: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes appends fail, as an unreachable broker would.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    /// Every record of `topic`, oldest first.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.topics
            .lock()
            .get(topic)
            .map(|payloads| {
                payloads
                    .iter()
                    .enumerate()
                    .map(|(offset, payload)| Record {
                        topic: topic.to_string(),
                        offset: offset as u64,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn try_fetch(&self, topic: &str, group: &str) -> Option<Record> {
        let position = self
            .positions
            .lock()
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or(0);
        let topics = self.topics.lock();
        let payload = topics.get(topic)?.get(position as usize)?;
        Some(Record {
            topic: topic.to_string(),
            offset: position,
            payload: payload.clone(),
        })
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, topic: &str, payload: Vec<u8>) -> Result<u64> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::Notify {
                reason: format!("broker unavailable, {topic} not acknowledged"),
            });
        }
        let offset = {
            let mut topics = self.topics.lock();
            let records = topics.entry(topic.to_string()).or_default();
            records.push(payload);
            records.len() as u64 - 1
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    async fn fetch(&self, topic: &str, group: &str) -> Result<Record> {
        loop {
            // Registered before the check so an append in between is not missed.
            let appended = self.appended.notified();
            if let Some(record) = self.try_fetch(topic, group) {
                return Ok(record);
            }
            appended.await;
        }
    }

    async fn commit(&self, topic: &str, group: &str, offset: u64) -> Result<()> {
        let mut positions = self.positions.lock();
        let position = positions
            .entry((topic.to_string(), group.to_string()))
            .or_insert(0);
        *position = (*position).max(offset + 1);
        Ok(())
    }

    async fn position(&self, topic: &str, group: &str) -> Result<u64> {
        Ok(self
            .positions
            .lock()
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn groups_track_their_own_positions() {
        let log = MemoryLog::new();
        log.append("events", b"a".to_vec()).await.expect("append");
        log.append("events", b"b".to_vec()).await.expect("append");

        let first = log.fetch("events", "g1").await.expect("fetch");
        assert_eq!(first.offset, 0);
        // Uncommitted records are handed out again.
        assert_eq!(log.fetch("events", "g1").await.expect("fetch"), first);

        log.commit("events", "g1", 0).await.expect("commit");
        assert_eq!(log.fetch("events", "g1").await.expect("fetch").payload, b"b");
        assert_eq!(log.position("events", "g2").await.expect("position"), 0);
    }

    #[tokio::test]
    async fn fetch_waits_for_append() {
        let log = Arc::new(MemoryLog::new());
        let waiter = {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.fetch("events", "g").await })
        };
        tokio::task::yield_now().await;
        log.append("events", b"late".to_vec()).await.expect("append");

        let record = waiter.await.expect("join").expect("fetch");
        assert_eq!(record.payload, b"late");
    }
}
