//! Affinity-thread scheduler
//!
//! This module provides the [`Scheduler`], which lets asynchronous work reach a
//! single designated thread (the affinity thread) and lets synchronous code on
//! that thread block on asynchronous work without deadlocking.
//!
//! # Architecture
//!
//! ```text
//! run_synchronously ──► root task ──► pump loop (affinity thread)
//!                           │               │ dequeues from reachable queues
//!                           ▼               ▼
//!                 spawn / switch awaiters   DependencyGraph
//!                           │               ▲ children + join edges
//!                           ▼               │
//!                      WorkerPool ──────────┘ (wakes enqueue onto node queues)
//! ```
//!
//! While a run blocks, only work queued on nodes reachable from the run's node
//! (its descendants and whatever they have joined) executes on the affinity
//! thread. Unrelated work waits until someone joins it.

pub mod adapter;
pub mod awaiter;
pub mod guard;
mod pump;
pub mod relevance;
pub mod task;
mod worker;

pub use adapter::{SchedulerHandle, WorkScheduler};
pub use awaiter::{yield_now, SwitchToAffinity, SwitchToBackground, YieldNow};
pub use guard::JoinGuard;
pub use relevance::RelevanceSuppression;
pub use task::{TaskHandle, TaskId, TaskState};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runtime::dag::{DependencyGraph, NodeId};
use crate::runtime::error::{SchedulerError, SchedulerResult};

use task::TaskCell;
use worker::WorkerPool;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of background worker threads.
    pub worker_threads: usize,
    /// Prefix for worker thread names.
    pub worker_name_prefix: String,
    /// Upper bound on a single idle wait of the pump loop before it re-checks
    /// its queues.
    #[serde(with = "duration_ms")]
    pub pump_idle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            worker_threads: num_cpus.max(4),
            worker_name_prefix: "affinity-worker".to_string(),
            pump_idle_timeout: Duration::from_millis(100),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Handle to a task node, tagged with the scheduler that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    scheduler: u64,
    id: NodeId,
}

impl NodeRef {
    #[inline]
    pub(crate) fn new(scheduler: u64, id: NodeId) -> Self {
        Self { scheduler, id }
    }

    /// The node's id within its scheduler's graph.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The id of the scheduler that owns this node.
    #[inline]
    pub fn scheduler_id(&self) -> u64 {
        self.scheduler
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.scheduler)
    }
}

/// An item in a node's affinity-thread queue.
pub(crate) enum WorkItem {
    /// Poll a task whose continuation must run on the affinity thread.
    Poll(Arc<TaskCell>),
    /// Run a plain callback submitted through the adapter.
    Callback(Box<dyn FnOnce() + Send + 'static>),
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Poll(task) => f.debug_tuple("Poll").field(&task.id()).finish(),
            WorkItem::Callback(_) => f.write_str("Callback"),
        }
    }
}

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every handle, task and guard of one scheduler.
pub(crate) struct Inner {
    id: u64,
    affinity: ThreadId,
    config: SchedulerConfig,
    graph: Mutex<DependencyGraph<WorkItem>>,
    /// Raised on every enqueue, join and completion.
    signal: Condvar,
    shut_down: AtomicBool,
    pool: WorkerPool,
}

impl Inner {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_affinity_thread(&self) -> bool {
        thread::current().id() == self.affinity
    }

    #[inline]
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Register a node linked under the ambient node unless relevance is
    /// suppressed.
    pub(crate) fn create_node(&self) -> NodeId {
        let parent = relevance::parent_for(self.id);
        self.graph.lock().create_node(parent)
    }

    /// Append an item to a node's queue and wake any pump.
    pub(crate) fn enqueue(&self, node: NodeId, item: WorkItem) {
        let orphan = {
            let mut graph = self.graph.lock();
            let orphan = match graph.enqueue(node, item) {
                Ok(()) => None,
                Err(item) => {
                    // The node is gone; park the item on a detached node that
                    // only an explicit join can reach.
                    let detached = graph.create_node(None);
                    if graph.enqueue(detached, item).is_ok() {
                        graph.complete(detached);
                    }
                    Some(detached)
                }
            };
            self.signal.notify_all();
            orphan
        };
        if let Some(detached) = orphan {
            warn!(node = %node, detached = %detached, "enqueue to a reaped node");
        }
    }

    pub(crate) fn submit_background(&self, task: Arc<TaskCell>) {
        self.pool.submit(task);
    }

    /// Mark a node's body finished and wake waiters.
    pub(crate) fn complete_node(&self, node: NodeId) {
        let mut graph = self.graph.lock();
        graph.complete(node);
        self.signal.notify_all();
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let items = {
            let mut graph = self.graph.lock();
            let items = graph.drain_all();
            self.signal.notify_all();
            items
        };
        debug!(scheduler = self.id, pending = items.len(), "scheduler shut down");
        for item in items {
            match item {
                WorkItem::Poll(task) => {
                    task.set_on_affinity(false);
                    self.submit_background(task);
                }
                WorkItem::Callback(_) => {
                    warn!(scheduler = self.id, "dropping queued callback at shutdown");
                }
            }
        }
    }

    /// Create a task on a fresh node and start it where it belongs.
    fn spawn_task<F, T>(self: &Arc<Self>, on_affinity: bool, future: F) -> TaskHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let node = self.create_node();
        let (task, slot) = TaskCell::new(self, node, on_affinity, future);
        debug!(task = %task.id(), node = %node, on_affinity, "task spawned");
        task.schedule();
        TaskHandle::new(slot, NodeRef::new(self.id, node))
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("affinity", &self.affinity)
            .field("shut_down", &self.is_shut_down())
            .field("workers", &self.pool.num_workers())
            .finish()
    }
}

/// Shuts the scheduler down once the last user-facing handle is gone.
///
/// Suspended tasks only reach the shared state weakly through their awaiters,
/// so without this a queued switch would keep it alive forever.
pub(crate) struct HandleCount {
    inner: Weak<Inner>,
}

impl Drop for HandleCount {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            debug!(scheduler = inner.id(), "last scheduler handle dropped");
            inner.shutdown();
        }
    }
}

/// Scheduler bound to one affinity thread.
///
/// Cheap to clone; all clones share the same graph, worker pool and affinity
/// thread. When the last clone (and every [`SchedulerHandle`]) is dropped the
/// scheduler shuts down as if [`shutdown`](Self::shutdown) had been called.
#[derive(Clone)]
pub struct Scheduler {
    // Dropped before `inner` so shutdown still finds the shared state.
    handles: Arc<HandleCount>,
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler whose affinity thread is the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if the worker threads cannot be spawned.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler for the calling thread with custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if the worker threads cannot be spawned.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::for_thread(thread::current().id(), config).expect("Failed to spawn worker threads")
    }

    /// Create a scheduler whose affinity thread is `affinity`.
    pub fn for_thread(affinity: ThreadId, config: SchedulerConfig) -> std::io::Result<Self> {
        let pool = WorkerPool::new(config.worker_threads, &config.worker_name_prefix)?;
        let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
        debug!(scheduler = id, ?affinity, workers = pool.num_workers(), "scheduler created");
        let inner = Arc::new(Inner {
            id,
            affinity,
            config,
            graph: Mutex::new(DependencyGraph::new()),
            signal: Condvar::new(),
            shut_down: AtomicBool::new(false),
            pool,
        });
        let handles = Arc::new(HandleCount {
            inner: Arc::downgrade(&inner),
        });
        Ok(Self { inner, handles })
    }

    /// Unique id of this scheduler instance.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether the calling thread is this scheduler's affinity thread.
    #[inline]
    pub fn is_affinity_thread(&self) -> bool {
        self.inner.is_affinity_thread()
    }

    /// Request that the awaiting task continue on the affinity thread.
    ///
    /// Completes without suspending when already on the affinity thread.
    ///
    /// Off the affinity thread the awaiting future must be a task of this
    /// scheduler (started by [`spawn`](Self::spawn) or a
    /// `run_synchronously*` call): a continuation owned by some other executor
    /// cannot be moved, so no node is created for it implicitly and the await
    /// fails with [`SchedulerError::NoAmbientTask`].
    #[inline]
    pub fn switch_to_affinity_thread(&self) -> SwitchToAffinity {
        SwitchToAffinity::new(&self.inner)
    }

    /// Request that the awaiting task continue on a background worker.
    #[inline]
    pub fn switch_to_background(&self) -> SwitchToBackground {
        SwitchToBackground::new(&self.inner)
    }

    /// Start `future` on the background pool as a new task.
    ///
    /// The task's node is a child of the ambient node (so a run that spawned
    /// it services its affinity-thread work) unless relevance is suppressed.
    pub fn spawn<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn_task(false, future)
    }

    /// Make `node`'s queue (and everything it reaches) visible to the ambient
    /// node's pump loop until the returned guard is released.
    pub fn join(&self, node: NodeRef) -> SchedulerResult<JoinGuard> {
        if node.scheduler != self.inner.id {
            return Err(SchedulerError::InvalidJoinTarget {
                current: self.inner.id,
                target: node.scheduler,
            });
        }
        let from = relevance::current_for(self.inner.id)
            .ok_or(SchedulerError::NoAmbientTask)?
            .node;
        let edge = {
            let mut graph = self.inner.graph.lock();
            let edge = graph.join(from, node.id)?;
            self.inner.signal.notify_all();
            edge
        };
        debug!(from = %from, to = %node.id, ?edge, "joined");
        Ok(JoinGuard::new(&self.inner, from, edge))
    }

    /// Stop linking newly created nodes to the ambient node until the
    /// returned guard drops.
    #[inline]
    pub fn suppress_relevance(&self) -> RelevanceSuppression {
        RelevanceSuppression::begin(self.inner.id)
    }

    /// The ambient node, if code of this scheduler is running on this thread.
    pub fn current_node(&self) -> Option<NodeRef> {
        relevance::current_for(self.inner.id).map(|a| NodeRef::new(self.inner.id, a.node))
    }

    /// Every live node whose queue is visible from `node`'s pump loop.
    pub fn reachable(&self, node: NodeRef) -> SchedulerResult<Vec<NodeRef>> {
        if node.scheduler != self.inner.id {
            return Err(SchedulerError::InvalidJoinTarget {
                current: self.inner.id,
                target: node.scheduler,
            });
        }
        let graph = self.inner.graph.lock();
        Ok(graph
            .reachable(node.id)
            .into_iter()
            .map(|id| NodeRef::new(self.inner.id, id))
            .collect())
    }

    /// Number of nodes currently alive in the graph.
    pub fn live_nodes(&self) -> usize {
        self.inner.graph.lock().len()
    }

    /// View the affinity thread as a generic work target.
    #[inline]
    pub fn as_work_scheduler(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.inner.clone(), self.handles.clone())
    }

    /// Tear down the affinity context.
    ///
    /// Tasks waiting for the affinity thread resume on a worker with
    /// [`SchedulerError::SchedulerShutDown`]; queued callbacks are dropped.
    /// Dropping the last `Scheduler` (and [`SchedulerHandle`]) does the same.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests;
