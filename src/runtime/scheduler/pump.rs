//! Synchronous tracked runs and the pump loop.
//!
//! A run blocks its calling thread until the tracked future completes. On the
//! affinity thread the wait is spent servicing work queued on nodes reachable
//! from the run's node, one item at a time, re-evaluating reachability after
//! every item. Work on unreachable nodes is never executed here.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, trace};

use crate::runtime::dag::{NodeId, ServiceCursor};
use crate::runtime::error::{SchedulerError, SchedulerResult};

use super::relevance::{self, Ambient};
use super::task::TaskCell;
use super::{Inner, Scheduler, WorkItem};

impl Inner {
    /// Service reachable queues on the affinity thread until `node` completes.
    fn pump(&self, node: NodeId) {
        let mut cursor = ServiceCursor::new();
        loop {
            let (source, item) = {
                let mut graph = self.graph.lock();
                loop {
                    if graph.is_completed(node) {
                        return;
                    }
                    if let Some(found) = graph.dequeue_reachable(node, &mut cursor) {
                        break found;
                    }
                    self.signal
                        .wait_for(&mut graph, self.config.pump_idle_timeout);
                }
            };
            trace!(pump = %node, source = %source, ?item, "pumping");
            self.execute(source, item);
            self.graph.lock().finish_item(source);
        }
    }

    /// Block a thread without affinity duties until `node` completes.
    fn wait_for(&self, node: NodeId) {
        let mut graph = self.graph.lock();
        while !graph.is_completed(node) {
            self.signal.wait(&mut graph);
        }
    }

    fn execute(&self, source: NodeId, item: WorkItem) {
        match item {
            WorkItem::Poll(task) => task.run(),
            WorkItem::Callback(work) => {
                let _scope = relevance::enter(Ambient::for_node(self.id, source));
                if let Err(payload) = catch_unwind(AssertUnwindSafe(work)) {
                    let error = SchedulerError::from_panic(payload);
                    error!(node = %source, %error, "affinity callback panicked");
                }
            }
        }
    }
}

/// Completes a run's node if creating its future unwinds.
struct CompleteOnUnwind<'a> {
    inner: &'a Inner,
    node: Option<NodeId>,
}

impl Drop for CompleteOnUnwind<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.inner.complete_node(node);
        }
    }
}

impl Scheduler {
    /// Run `op` to completion, blocking the calling thread.
    ///
    /// On the affinity thread the wait pumps relevant queued work; elsewhere it
    /// simply blocks. Runs may nest freely.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_pump::Scheduler;
    ///
    /// let scheduler = Scheduler::new();
    /// let s = scheduler.clone();
    /// scheduler
    ///     .run_synchronously(move || async move {
    ///         s.switch_to_background().await?;
    ///         assert!(!s.is_affinity_thread());
    ///         s.switch_to_affinity_thread().await?;
    ///         assert!(s.is_affinity_thread());
    ///         anyhow::Ok(())
    ///     })
    ///     .unwrap();
    /// ```
    pub fn run_synchronously<F, Fut>(&self, op: F) -> SchedulerResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.run_synchronously_with_result(op)
    }

    /// Run `op` to completion, blocking the calling thread, and return the
    /// value it produces.
    pub fn run_synchronously_with_result<F, Fut, T>(&self, op: F) -> SchedulerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = &self.inner;
        let on_affinity = inner.is_affinity_thread();
        let node = inner.create_node();
        debug!(scheduler = inner.id, node = %node, on_affinity, "run started");

        // Anything the closure starts before returning its future belongs
        // to this run.
        let future = {
            let _scope = relevance::enter(Ambient::for_node(inner.id, node));
            let mut unwind = CompleteOnUnwind {
                inner: inner.as_ref(),
                node: Some(node),
            };
            let future = op();
            unwind.node = None;
            future
        };
        let (task, slot) = TaskCell::new(inner, node, on_affinity, future);
        task.run_inline();
        drop(task);

        if on_affinity {
            inner.pump(node);
        } else {
            inner.wait_for(node);
        }
        debug!(scheduler = inner.id, node = %node, "run finished");

        slot.take().unwrap_or(Err(SchedulerError::TaskDropped))
    }
}
