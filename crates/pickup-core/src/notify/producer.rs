use super::{ChangeEvent, EventLog, Operation};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Publishes [`ChangeEvent`]s to one topic and waits for the log to
/// acknowledge each one.
#[derive(Clone)]
pub struct Notifier {
    log: Arc<dyn EventLog>,
    topic: Arc<str>,
    // One send in flight at a time keeps per-producer ordering.
    in_flight: Arc<Mutex<()>>,
}

impl Notifier {
    pub fn new(log: Arc<dyn EventLog>, topic: impl Into<Arc<str>>) -> Self {
        Self {
            log,
            topic: topic.into(),
            in_flight: Arc::default(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sends `event` and returns its offset once acknowledged.
    pub async fn send(&self, event: &ChangeEvent) -> Result<u64> {
        let payload = event.encode()?;
        let _in_flight = self.in_flight.lock().await;
        let offset = self
            .log
            .append(&self.topic, payload)
            .await
            .map_err(|e| Error::Notify {
                reason: format!("send {} event for {}: {e}", event.operation, event.subject_id),
            })?;
        tracing::debug!(
            topic = %self.topic,
            offset,
            operation = %event.operation,
            subject_id = event.subject_id,
            "event acknowledged"
        );
        Ok(offset)
    }

    /// Sends an [`Operation::Error`] event describing a failed `operation`.
    pub async fn send_error(
        &self,
        operation: Operation,
        subject_id: i64,
        message: &str,
    ) -> Result<u64> {
        let event = ChangeEvent::new(
            Operation::Error,
            subject_id,
            format!("Error: {operation}: {message}"),
        );
        self.send(&event).await
    }

    /// Sends `event`, logging instead of returning a failure.
    ///
    /// Used after a mutation has committed, where a lost notification must
    /// not turn a successful call into a failed one.
    pub async fn publish(&self, event: ChangeEvent) {
        if let Err(e) = self.send(&event).await {
            tracing::error!(
                operation = %event.operation,
                subject_id = event.subject_id,
                "failed to publish event: {e}"
            );
        }
    }

    /// Reports `error` on behalf of a failed `operation`. Send failures are
    /// logged.
    pub async fn report_error(&self, operation: Operation, subject_id: i64, error: &Error) {
        if let Err(e) = self.send_error(operation, subject_id, &error.to_string()).await {
            tracing::error!(%operation, subject_id, "failed to report error: {e}");
        }
    }
}
