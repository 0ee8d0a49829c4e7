//! Bounded worker pool for inbound callbacks.
//!
//! A fixed set of workers drains a bounded job queue. Jobs run on tokio's
//! blocking thread pool, so application handlers may block without stalling
//! the RPC listener. When the queue is full, [`CallbackPool::submit`] waits
//! for room.

use crate::{Result, ScnError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool that runs callback jobs.
pub struct CallbackPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl CallbackPool {
    /// Spawn `workers` workers sharing a queue of `queue_depth` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| tokio::spawn(Self::worker(id, rx.clone())))
            .collect();

        Self { tx, workers }
    }

    async fn worker(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else {
                break;
            };

            if let Err(e) = tokio::task::spawn_blocking(job).await {
                if e.is_panic() {
                    warn!("Callback panicked on worker {}", id);
                } else {
                    debug!("Callback on worker {} was cancelled", id);
                }
            }
        }
        debug!("Callback worker {} stopped", id);
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .await
            .map_err(|_| ScnError::transport("callback pool is closed"))
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for CallbackPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for CallbackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPool")
            .field("workers", &self.workers.len())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}
