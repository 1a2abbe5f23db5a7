//! Background dispatch worker pool.
//!
//! Recorded events are handed to a bounded queue drained by N workers, so the
//! HTTP response only waits for the duplicate check and the insert. A full
//! queue never drops work: the job runs on a detached, tracked task instead.
//! Shutdown drains whatever is queued before returning.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    dispatcher::{DispatchJob, Dispatcher},
    error::{IngestError, Result},
};

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Queue capacity before jobs overflow to detached tasks.
    pub queue_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { worker_count: crate::DEFAULT_WORKER_COUNT, queue_size: crate::DEFAULT_QUEUE_SIZE }
    }
}

/// Cloneable handle for submitting jobs to a running pool.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchJob>,
    dispatcher: Dispatcher,
    overflow: TaskTracker,
}

impl DispatchQueue {
    /// Hands a job to the workers without waiting for it to run.
    pub fn submit(&self, job: DispatchJob) {
        match self.sender.try_send(job) {
            Ok(()) => {},
            Err(TrySendError::Full(job)) => {
                warn!(
                    event_id = %job.context.key.event_id,
                    "dispatch queue full, running job detached"
                );
                self.spawn_detached(job);
            },
            Err(TrySendError::Closed(job)) => {
                warn!(
                    event_id = %job.context.key.event_id,
                    "dispatch queue closed, running job detached"
                );
                self.spawn_detached(job);
            },
        }
    }

    fn spawn_detached(&self, job: DispatchJob) {
        let dispatcher = self.dispatcher.clone();
        self.overflow.spawn(async move {
            dispatcher.run(job).await;
        });
    }
}

/// Supervised dispatch workers sharing one queue.
pub struct DispatchPool {
    config: PoolConfig,
    dispatcher: Dispatcher,
    queue: DispatchQueue,
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Creates a pool. Workers start with `spawn_workers`.
    pub fn new(
        dispatcher: Dispatcher,
        config: PoolConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let queue =
            DispatchQueue { sender, dispatcher: dispatcher.clone(), overflow: TaskTracker::new() };

        Self {
            config,
            dispatcher,
            queue,
            receiver: Arc::new(Mutex::new(receiver)),
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Returns a submission handle.
    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Spawns the configured number of workers.
    pub fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning dispatch workers");

        for worker_id in 0..self.config.worker_count {
            let receiver = self.receiver.clone();
            let dispatcher = self.dispatcher.clone();
            let token = self.cancellation_token.clone();

            self.worker_handles.push(tokio::spawn(async move {
                info!(worker_id, "dispatch worker starting");
                run_worker(receiver, dispatcher, token).await;
                info!(worker_id, "dispatch worker stopped");
            }));
        }
    }

    /// Stops the workers after the queue is drained.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::ShutdownTimeout` if draining takes longer than
    /// `timeout`, or `IngestError::WorkerPanic` if a worker panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful dispatch shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let receiver = self.receiver.clone();
        let dispatcher = self.dispatcher.clone();
        let overflow = self.queue.overflow.clone();

        let shutdown = async move {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "dispatch worker panicked");
                    first_panic.get_or_insert(IngestError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }

            // Jobs submitted after the workers exited.
            let mut receiver = receiver.lock().await;
            receiver.close();
            while let Ok(job) = receiver.try_recv() {
                dispatcher.run(job).await;
            }
            drop(receiver);

            overflow.close();
            overflow.wait().await;

            first_panic
        };

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(None) => {
                info!("dispatch pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(timeout_seconds = timeout.as_secs(), "dispatch shutdown timed out");
                Err(IngestError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        if self.has_active_workers() && !self.cancellation_token.is_cancelled() {
            warn!("DispatchPool dropped without shutdown_graceful, cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}

async fn run_worker(
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    dispatcher: Dispatcher,
    token: CancellationToken,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                job = receiver.recv() => job,
                () = token.cancelled() => None,
            }
        };

        match job {
            Some(job) => {
                dispatcher.run(job).await;
            },
            None => break,
        }
    }

    // Drain what is already queued.
    loop {
        let job = receiver.lock().await.try_recv().ok();
        let Some(job) = job else { break };
        dispatcher.run(job).await;
    }
}
