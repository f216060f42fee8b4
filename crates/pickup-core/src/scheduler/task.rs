use crate::{Error, Result};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

pub(super) type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A queued unit of work together with its claim on the outstanding counter.
///
/// The claim is released when the job is dropped, whether it ran to
/// completion, panicked, or was discarded with the queue.
pub(super) struct Job {
    pub(super) task: BoxTask,
    pub(super) claim: OutstandingClaim,
}

impl Job {
    /// Wraps `fut` so that its output is delivered through a [`TaskHandle`].
    pub(super) fn new<F, T>(fut: F, claim: OutstandingClaim) -> (Self, TaskHandle<T>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = Box::pin(async move {
            // The caller may have stopped listening.
            let _ = tx.send(fut.await);
        });
        (Self { task, claim }, TaskHandle { rx })
    }
}

pub(super) struct OutstandingClaim {
    counter: Arc<watch::Sender<usize>>,
}

impl OutstandingClaim {
    pub(super) fn acquire(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for OutstandingClaim {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Completion handle for a submitted task.
///
/// Resolves to the task's output, or to [`Error::TaskFailed`] if the task
/// panicked or was discarded before it ran. Dropping the handle does not
/// cancel the task.
#[must_use = "dropping a TaskHandle detaches the task"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map_err(|_| Error::TaskFailed {
            reason: "task panicked or was discarded before completion".to_string(),
        })
    }
}
