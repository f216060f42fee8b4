//! Resizable worker pool shared by every entity service.
//!
//! The [`Scheduler`] owns one bounded FIFO queue and a cohort ("generation")
//! of asynchronous executors pulling from it. Submitting blocks while the
//! queue is full, so callers feel backpressure instead of losing work.
//!
//! Resizing replaces the whole cohort: the current generation's
//! [`CancellationToken`] is cancelled and a fresh generation of `n` executors
//! is spawned, all under one lock. Executors only take a job from the queue
//! through a cancel-safe receive, so a job is either still queued or owned by
//! an executor that will run it; resizing never loses work.
//!
//! Most callers use [`Scheduler::run`], which submits and awaits the task's
//! output. [`Scheduler::submit`] returns a [`TaskHandle`] that may be awaited
//! later or dropped, and [`Scheduler::wait`] blocks until every submitted
//! task has finished.

mod task;
mod worker;

pub use task::TaskHandle;

use crate::{Error, Result};
use core::{future::Future, time::Duration};
use parking_lot::Mutex;
use std::sync::Arc;
use task::{Job, OutstandingClaim};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use worker::worker_loop;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Sizing of a [`Scheduler`].
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of concurrent executors.
    pub workers: usize,
    /// Capacity of the task queue. Submitters block once it is full.
    pub queue_capacity: usize,
    /// Upper bound on draining outstanding work during [`Scheduler::close`].
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidWorkerCount { count: 0 });
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// The currently running cohort of executors.
struct Generation {
    id: u64,
    token: CancellationToken,
    workers: usize,
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    generation: Mutex<Generation>,
    outstanding: Arc<watch::Sender<usize>>,
    shutdown_timeout: Duration,
}

/// A bounded queue of tasks executed by a resizable set of workers.
///
/// Cloning is cheap; all clones share the same queue and executors.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates the queue and spawns the first generation of executors.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (outstanding, _) = watch::channel(0_usize);
        let receiver = Arc::new(AsyncMutex::new(rx));
        let token = CancellationToken::new();
        let handles = spawn_generation(0, config.workers, &receiver, &token);

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "scheduler started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(tx)),
                receiver,
                generation: Mutex::new(Generation {
                    id: 0,
                    token,
                    workers: config.workers,
                    handles,
                    closed: false,
                }),
                outstanding: Arc::new(outstanding),
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }

    /// Enqueues `fut` and returns a handle to its output.
    ///
    /// Waits while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`Scheduler::close`] has begun.
    pub async fn submit<F, T>(&self, fut: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .lock()
            .clone()
            .ok_or(Error::ServiceShutdown)?;

        let claim = OutstandingClaim::acquire(&self.inner.outstanding);
        let (job, handle) = Job::new(fut, claim);

        // A rejected job is dropped here, releasing its claim.
        sender.send(job).await.map_err(|_| Error::ServiceShutdown)?;
        Ok(handle)
    }

    /// Submits `fut` and waits for its output.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(fut).await?.await
    }

    /// Waits until every submitted task has finished.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.inner.outstanding.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| Error::ChannelError {
                context: "outstanding task counter closed".to_string(),
            })
    }

    /// Replaces the current executors with `workers` new ones.
    ///
    /// Tasks already running on the old generation finish normally; queued
    /// tasks are picked up by the new generation.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerCount`] if `workers` is zero.
    /// - [`Error::ServiceShutdown`] if the scheduler has been closed.
    pub fn resize(&self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(Error::InvalidWorkerCount { count: workers });
        }

        let mut generation = self.inner.generation.lock();
        if generation.closed || self.inner.sender.lock().is_none() {
            return Err(Error::ServiceShutdown);
        }

        generation.token.cancel();
        generation.handles.retain(|h| !h.is_finished());

        let previous = generation.workers;
        generation.id += 1;
        generation.token = CancellationToken::new();
        generation.workers = workers;

        let handles = spawn_generation(
            generation.id,
            workers,
            &self.inner.receiver,
            &generation.token,
        );
        generation.handles.extend(handles);

        tracing::info!(
            generation = generation.id,
            previous,
            workers,
            "scheduler resized"
        );
        Ok(())
    }

    /// Number of executors in the current generation.
    pub fn workers(&self) -> usize {
        self.inner.generation.lock().workers
    }

    /// Number of submitted tasks that have not finished yet.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Stops accepting work, drains what is queued and stops the executors.
    ///
    /// Calling `close` more than once is harmless. Tasks still queued when
    /// the shutdown timeout elapses are discarded and their handles resolve to
    /// [`Error::TaskFailed`].
    pub async fn close(&self) -> Result<()> {
        // === Phase 0: Stop accepting new tasks ===
        let Some(sender) = self.inner.sender.lock().take() else {
            tracing::debug!("scheduler already closed");
            return Ok(());
        };
        drop(sender);
        tracing::info!(outstanding = self.outstanding(), "closing scheduler");

        // === Phase 1: Drain queued and running tasks ===
        match timeout(self.inner.shutdown_timeout, self.wait()).await {
            Ok(Ok(())) => tracing::debug!("all outstanding tasks finished"),
            Ok(Err(e)) => tracing::warn!("failed to observe drain: {e}"),
            Err(_) => tracing::warn!(
                outstanding = self.outstanding(),
                "drain timed out"
            ),
        }

        // === Phase 2: Stop the current generation ===
        let handles = {
            let mut generation = self.inner.generation.lock();
            generation.closed = true;
            generation.token.cancel();
            core::mem::take(&mut generation.handles)
        };

        // === Phase 3: Join executors ===
        let joins = handles.into_iter().map(|handle| async move {
            match timeout(Duration::from_secs(3), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("worker exited abnormally: {e}"),
                Err(_) => tracing::warn!("worker shutdown timed out"),
            }
        });
        futures::future::join_all(joins).await;

        tracing::info!("scheduler closed");
        Ok(())
    }
}

fn spawn_generation(
    generation: u64,
    workers: usize,
    receiver: &Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..workers)
        .map(|worker_id| {
            tokio::spawn(worker_loop(
                worker_id,
                generation,
                Arc::clone(receiver),
                token.clone(),
            ))
        })
        .collect()
}
