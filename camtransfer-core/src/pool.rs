//! Fixed-width worker pool fed by an unbounded job queue.
//!
//! Submission never blocks, so the capture loop keeps pace with the device
//! however slow transfers are. Memory grows with the backlog instead.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PoolClosed;
use crate::pipeline::{Job, Pipeline};
use crate::stage::Stage;

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<Job>>>>;

/// Cloneable submission handle. Stops accepting jobs once the pool is closed.
#[derive(Clone)]
pub struct JobSubmitter {
    sender: SharedSender,
}

impl JobSubmitter {
    pub fn submit(&self, job: Job) -> Result<(), PoolClosed> {
        let guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| PoolClosed),
            None => Err(PoolClosed),
        }
    }
}

pub struct WorkerPool {
    sender: SharedSender,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `width` workers (at least one) on the current runtime.
    pub fn spawn(width: usize, pipeline: Arc<Pipeline>) -> Self {
        let width = width.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..width)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), pipeline.clone())))
            .collect();

        info!(width, "Worker pool started");
        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            workers,
        }
    }

    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            sender: self.sender.clone(),
        }
    }

    pub fn submit(&self, job: Job) -> Result<(), PoolClosed> {
        self.submitter().submit(job)
    }

    pub fn width(&self) -> usize {
        self.workers.len()
    }

    /// Refuse new submissions. Queued jobs still run.
    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        if guard.take().is_some() {
            debug!("Worker pool closed to new submissions");
        }
    }

    /// Close the pool and wait until every queued and in-flight job finished.
    pub async fn shutdown(self) {
        self.close();
        info!(pending_workers = self.workers.len(), "Draining worker pool");
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool drained");
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    pipeline: Arc<Pipeline>,
) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(job) = next else {
            debug!(worker = id, "Queue closed, worker exiting");
            break;
        };

        let name = job.name();
        let runner = pipeline.clone();
        // Run on its own task so a panicking job cannot take the worker down.
        let outcome = tokio::spawn(async move { runner.process(&job).await }).await;
        match outcome {
            Ok(stage) => debug!(worker = id, file = %name, %stage, "Job finished"),
            Err(e) => {
                error!(worker = id, file = %name, error = %e, "Job panicked");
                pipeline.status().set(&name, Stage::Failed, None);
            }
        }
    }
}
