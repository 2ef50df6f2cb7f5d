//! The affinity thread as a generic work target.
//!
//! Work submitted here is queued on the ambient node at submission time, so
//! it obeys the same reachability and ordering rules as task continuations: a
//! blocked run executes it only if the submitter was relevant to that run, or
//! after an explicit join of the returned node, and callbacks from one
//! submitter run in submission order.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::runtime::dag::NodeId;

use super::relevance;
use super::task::TaskHandle;
use super::{HandleCount, Inner, NodeRef, WorkItem};

/// Anything that accepts fire-and-forget work items.
pub trait WorkScheduler: Send + Sync {
    /// Queue `work`, returning the node that tracks it.
    fn schedule(&self, work: Box<dyn FnOnce() + Send + 'static>) -> NodeRef;
}

/// Handle returned by [`Scheduler::as_work_scheduler`](super::Scheduler::as_work_scheduler).
///
/// Keeps the scheduler alive like a [`Scheduler`](super::Scheduler) clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    _handles: Arc<HandleCount>,
    inner: Arc<Inner>,
}

impl SchedulerHandle {
    pub(crate) fn new(inner: Arc<Inner>, handles: Arc<HandleCount>) -> Self {
        Self {
            _handles: handles,
            inner,
        }
    }

    /// Run `f` on the affinity thread and observe its result.
    pub fn run<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.spawn_task(true, async move { anyhow::Ok(f()) })
    }

    /// The id of the scheduler behind this handle.
    #[inline]
    pub fn scheduler_id(&self) -> u64 {
        self.inner.id()
    }
}

impl WorkScheduler for SchedulerHandle {
    /// Queue `work` on the ambient node, behind anything that node already
    /// queued. Without an ambient node (or while relevance is suppressed) the
    /// work gets a detached node that only an explicit join can reach.
    fn schedule(&self, work: Box<dyn FnOnce() + Send + 'static>) -> NodeRef {
        let ambient = relevance::parent_for(self.inner.id());
        if self.inner.is_shut_down() {
            warn!(scheduler = self.inner.id(), "callback scheduled after shutdown is dropped");
            drop(work);
            let node = ambient.unwrap_or_else(|| {
                let node = self.inner.graph.lock().create_node(None);
                self.inner.complete_node(node);
                node
            });
            return NodeRef::new(self.inner.id(), node);
        }
        let node: NodeId = {
            let mut graph = self.inner.graph.lock();
            let target = ambient.filter(|node| graph.contains_node(*node));
            let node = match target {
                Some(node) => node,
                None => graph.create_node(None),
            };
            // Always succeeds: the node is alive under this lock.
            let _ = graph.enqueue(node, WorkItem::Callback(work));
            if target.is_none() {
                // A detached node has no body of its own; it lives until its
                // item ran.
                graph.complete(node);
            }
            self.inner.signal.notify_all();
            node
        };
        trace!(node = %node, ambient = ?ambient, "callback scheduled");
        NodeRef::new(self.inner.id(), node)
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("scheduler", &self.inner.id())
            .finish()
    }
}
