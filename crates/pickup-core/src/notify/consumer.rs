use super::{ChangeEvent, EventLog, Operation, log::Record};
use crate::{Error, Result};
use async_trait::async_trait;
use core::time::Duration;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reacts to one delivered event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: &ChangeEvent) -> Result<()>;
}

/// Logs every recognised change. Error reports and unknown operations are
/// rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &ChangeEvent) -> Result<()> {
        match event.operation {
            Operation::Error | Operation::Unknown => Err(Error::Notify {
                reason: format!(
                    "unhandled operation {} for {}: {}",
                    event.operation, event.subject_id, event.description
                ),
            }),
            operation => {
                tracing::info!(
                    %operation,
                    subject_id = event.subject_id,
                    at = %event.timestamp,
                    "{}",
                    event.description
                );
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Pause before each retry.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries > 0 && self.delay.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "retry delay must be non-zero when retries are enabled".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    pub retry: RetryPolicy,
    /// Where exhausted messages go. `None` drops them.
    pub dead_letter_topic: Option<String>,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            retry: RetryPolicy::default(),
            dead_letter_topic: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Every attempt failed and the record was dropped.
    Dropped,
    /// Every attempt failed and the record was moved to the dead-letter topic.
    DeadLettered,
    /// The payload was not a [`ChangeEvent`].
    Undecodable,
}

/// Consumes one topic as a member of a consumer group.
///
/// Each record is committed exactly once, after it was handled or given up
/// on, so a failing record never blocks the records behind it.
pub struct Consumer<H> {
    log: Arc<dyn EventLog>,
    handler: H,
    config: ConsumerConfig,
}

impl<H: EventHandler> Consumer<H> {
    pub fn new(log: Arc<dyn EventLog>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            log,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Waits for the next record, processes it and commits its offset.
    pub async fn poll_once(&self) -> Result<Outcome> {
        let record = self
            .log
            .fetch(&self.config.topic, &self.config.group)
            .await?;

        let outcome = match ChangeEvent::decode(&record.payload) {
            Ok(event) => self.process(&record, &event).await,
            Err(e) => {
                tracing::warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    "skipping undecodable record: {e}"
                );
                self.dead_letter(&record).await;
                Outcome::Undecodable
            }
        };

        self.log
            .commit(&self.config.topic, &self.config.group, record.offset)
            .await?;
        Ok(outcome)
    }

    /// Consumes until `token` is cancelled.
    ///
    /// A record interrupted by cancellation is left uncommitted and delivered
    /// again to the next member of the group.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group,
            "consumer started"
        );
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                polled = self.poll_once() => match polled {
                    Ok(outcome) => tracing::trace!(?outcome, "record consumed"),
                    Err(e) => {
                        tracing::error!("consumer poll failed: {e}");
                        tokio::select! {
                            () = token.cancelled() => break,
                            () = tokio::time::sleep(self.config.retry.delay) => {}
                        }
                    }
                },
            }
        }
        tracing::info!(topic = %self.config.topic, "consumer stopped");
    }

    async fn process(&self, record: &Record, event: &ChangeEvent) -> Outcome {
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            match self.handler.handle(event).await {
                Ok(()) => return Outcome::Handled,
                Err(e) if attempt < retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        offset = record.offset,
                        operation = %event.operation,
                        attempt,
                        max_retries = retry.max_retries,
                        "handler failed, retrying: {e}"
                    );
                    tokio::time::sleep(retry.delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        offset = record.offset,
                        operation = %event.operation,
                        subject_id = event.subject_id,
                        "giving up after {} retries: {e}",
                        retry.max_retries
                    );
                    return if self.dead_letter(record).await {
                        Outcome::DeadLettered
                    } else {
                        Outcome::Dropped
                    };
                }
            }
        }
    }

    /// Copies `record` to the dead-letter topic, if one is configured.
    async fn dead_letter(&self, record: &Record) -> bool {
        let Some(topic) = &self.config.dead_letter_topic else {
            return false;
        };
        match self.log.append(topic, record.payload.clone()).await {
            Ok(offset) => {
                tracing::warn!(dead_letter_topic = %topic, offset, "record dead-lettered");
                true
            }
            Err(e) => {
                tracing::error!(dead_letter_topic = %topic, "dead-lettering failed, dropping: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MemoryLog, Notifier};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every call for events whose description says so.
    #[derive(Clone, Default)]
    struct Flaky {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        async fn handle(&self, event: &ChangeEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if event.description.contains("poison") {
                Err(Error::Notify {
                    reason: "downstream refused".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn setup(config: ConsumerConfig) -> (Arc<MemoryLog>, Notifier, Consumer<Flaky>, Flaky) {
        let log = Arc::new(MemoryLog::new());
        let notifier = Notifier::new(log.clone(), config.topic.clone());
        let handler = Flaky::default();
        let consumer = Consumer::new(log.clone(), handler.clone(), config);
        (log, notifier, consumer, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_record_is_committed_and_never_redelivered() {
        let (log, notifier, consumer, handler) = setup(ConsumerConfig::new("events", "group"));
        notifier
            .send(&ChangeEvent::new(Operation::Update, 1, "poison"))
            .await
            .expect("send");
        notifier
            .send(&ChangeEvent::new(Operation::Update, 2, "fine"))
            .await
            .expect("send");

        let started = tokio::time::Instant::now();
        assert_eq!(consumer.poll_once().await.expect("poll"), Outcome::Dropped);
        // One attempt plus three retries, each retry after the delay.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(log.position("events", "group").await.expect("position"), 1);

        // The next poll moves on instead of retrying a fifth time.
        assert_eq!(consumer.poll_once().await.expect("poll"), Outcome::Handled);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert_eq!(log.position("events", "group").await.expect("position"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_record_goes_to_dead_letter_topic() {
        let config = ConsumerConfig::new("events", "group")
            .with_retry(RetryPolicy {
                max_retries: 1,
                delay: Duration::from_millis(10),
            })
            .with_dead_letter_topic("events.dlq");
        let (log, notifier, consumer, handler) = setup(config);
        notifier
            .send(&ChangeEvent::new(Operation::Delete, 9, "poison"))
            .await
            .expect("send");

        assert_eq!(consumer.poll_once().await.expect("poll"), Outcome::DeadLettered);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(log.records("events.dlq"), vec![Record {
            topic: "events.dlq".to_string(),
            offset: 0,
            payload: log.records("events")[0].payload.clone(),
        }]);
    }

    #[tokio::test]
    async fn undecodable_records_are_skipped() {
        let (log, _, consumer, handler) = setup(ConsumerConfig::new("events", "group"));
        log.append("events", b"not json".to_vec()).await.expect("append");

        assert_eq!(consumer.poll_once().await.expect("poll"), Outcome::Undecodable);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.position("events", "group").await.expect("position"), 1);
    }

    #[tokio::test]
    async fn logging_handler_rejects_error_reports() {
        let handler = LoggingHandler;
        handler
            .handle(&ChangeEvent::new(Operation::Issue, 1, "Order 1 issued"))
            .await
            .expect("issue is handled");
        assert!(
            handler
                .handle(&ChangeEvent::new(Operation::Error, 1, "Error: issue: boom"))
                .await
                .is_err()
        );
        assert!(
            handler
                .handle(&ChangeEvent::new(Operation::Unknown, 1, "?"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_, notifier, consumer, handler) = setup(ConsumerConfig::new("events", "group"));
        let consumer = Arc::new(consumer);
        let token = CancellationToken::new();
        let running = {
            let consumer = Arc::clone(&consumer);
            let token = token.clone();
            tokio::spawn(async move { consumer.run(token).await })
        };

        notifier
            .send(&ChangeEvent::new(Operation::Create, 1, "Order 1 created"))
            .await
            .expect("send");
        while handler.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        running.await.expect("join");
    }
}
