//! Background worker pool.
//!
//! Tasks that are not bound to the affinity thread are polled here. Workers
//! share one unbounded channel; they exit once every sender is gone.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use super::task::TaskCell;

/// Pool of named worker threads polling background tasks.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    sender: Sender<Arc<TaskCell>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawn `num_workers` threads named `{prefix}-{index}`.
    pub(crate) fn new(num_workers: usize, prefix: &str) -> std::io::Result<Self> {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = channel::unbounded();
        for worker_id in 0..num_workers {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{}", prefix, worker_id))
                .spawn(move || Self::worker_loop(worker_id, receiver))?;
        }
        Ok(Self {
            sender,
            num_workers,
        })
    }

    /// Worker thread main loop.
    fn worker_loop(worker_id: usize, receiver: Receiver<Arc<TaskCell>>) {
        debug!(worker_id, "worker started");
        while let Ok(task) = receiver.recv() {
            task.run();
        }
        debug!(worker_id, "worker exiting");
    }

    /// Queue a task for polling on some worker.
    pub(crate) fn submit(&self, task: Arc<TaskCell>) {
        if let Err(err) = self.sender.send(task) {
            error!(task = %err.0.id(), "worker pool is closed");
        }
    }

    #[inline]
    pub(crate) fn num_workers(&self) -> usize {
        self.num_workers
    }
}
