use super::task::Job;
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Executor loop for one worker of a scheduler generation.
///
/// Workers of every generation share one receiver. A worker only removes a
/// job from the queue through a cancel-safe receive, so a generation that is
/// stopped while idle never takes a job it will not run. Once a job has been
/// taken it runs to completion; the stop token is only observed between jobs.
///
/// The loop ends when the generation's token is cancelled or when every sender
/// is gone and the queue is empty.
pub(super) async fn worker_loop(
    worker_id: usize,
    generation: u64,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    token: CancellationToken,
) {
    tracing::trace!(worker_id, generation, "worker started");

    loop {
        let job = {
            let mut rx = tokio::select! {
                biased;
                () = token.cancelled() => break,
                rx = receiver.lock() => rx,
            };
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                job = rx.recv() => job,
            }
        };

        let Some(Job { task, claim }) = job else {
            tracing::debug!(worker_id, generation, "queue closed");
            break;
        };

        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(worker_id, generation, "task panicked: {message}");
        }
        drop(claim);
    }

    tracing::trace!(worker_id, generation, "worker stopped");
}
