//! Tasks driven by the scheduler.
//!
//! A task is one tracked future plus the bookkeeping needed to decide where
//! its next poll happens. Waking a task is how a continuation is "enqueued":
//! depending on the task's location it lands either on its node's
//! affinity-thread queue or on the background worker pool.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use tracing::trace;

use crate::runtime::dag::NodeId;
use crate::runtime::error::{SchedulerError, SchedulerResult};

use super::relevance::{self, Ambient};
use super::{Inner, NodeRef, WorkItem};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(0);

/// Task run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Suspended; nobody holds a pending dispatch for it.
    Idle,
    /// Sitting in a node queue or the worker channel.
    Scheduled,
    /// Being polled.
    Running,
    /// Woken while being polled; must be dispatched again afterwards.
    Notified,
    /// The future has completed.
    Finished,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Idle,
            1 => TaskState::Scheduled,
            2 => TaskState::Running,
            3 => TaskState::Notified,
            _ => TaskState::Finished,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Idle => 0,
            TaskState::Scheduled => 1,
            TaskState::Running => 2,
            TaskState::Notified => 3,
            TaskState::Finished => 4,
        }
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The shared cell behind a task and its wakers.
pub(crate) struct TaskCell {
    id: TaskId,
    node: NodeId,
    scheduler_id: u64,
    scheduler: Weak<Inner>,
    state: AtomicU8,
    /// Where the next poll should happen.
    on_affinity: AtomicBool,
    /// Depth of relevance suppression scopes opened by this task.
    suppressed: AtomicUsize,
    future: Mutex<Option<BoxFuture>>,
}

impl TaskCell {
    /// Wrap `future` into a task bound to `node`, returning the task and the
    /// slot its result will be written to.
    pub(crate) fn new<F, T>(
        inner: &Arc<Inner>,
        node: NodeId,
        on_affinity: bool,
        future: F,
    ) -> (Arc<Self>, Arc<ResultSlot<T>>)
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(ResultSlot::new());
        let tracked = Tracked {
            future: Box::pin(future),
            slot: slot.clone(),
        };
        let task = Arc::new(Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            node,
            scheduler_id: inner.id(),
            scheduler: Arc::downgrade(inner),
            state: AtomicU8::new(TaskState::Idle.as_u8()),
            on_affinity: AtomicBool::new(on_affinity),
            suppressed: AtomicUsize::new(0),
            future: Mutex::new(Some(Box::pin(tracked))),
        });
        (task, slot)
    }

    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub(crate) fn scheduler_id(&self) -> u64 {
        self.scheduler_id
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn on_affinity(&self) -> bool {
        self.on_affinity.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_on_affinity(&self, on_affinity: bool) {
        self.on_affinity.store(on_affinity, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn suppression(&self) -> &AtomicUsize {
        &self.suppressed
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Request another poll.
    pub(crate) fn schedule(self: &Arc<Self>) {
        loop {
            match self.state() {
                TaskState::Idle => {
                    if self.transition(TaskState::Idle, TaskState::Scheduled) {
                        self.dispatch();
                        return;
                    }
                }
                TaskState::Running => {
                    if self.transition(TaskState::Running, TaskState::Notified) {
                        return;
                    }
                }
                TaskState::Scheduled | TaskState::Notified | TaskState::Finished => return,
            }
        }
    }

    /// Hand a `Scheduled` task to whoever runs it next.
    fn dispatch(self: &Arc<Self>) {
        let Some(inner) = self.scheduler.upgrade() else {
            trace!(task = %self.id, "scheduler gone, dropping task");
            return;
        };
        if self.on_affinity() && !inner.is_shut_down() {
            inner.enqueue(self.node, WorkItem::Poll(self.clone()));
        } else {
            inner.submit_background(self.clone());
        }
    }

    /// Poll on the calling thread right away, as the first step of a run.
    pub(crate) fn run_inline(self: &Arc<Self>) {
        if self.transition(TaskState::Idle, TaskState::Scheduled) {
            self.run();
        }
    }

    /// Poll the future once. The caller must have taken the task out of a
    /// queue, so the state is `Scheduled`.
    pub(crate) fn run(self: &Arc<Self>) {
        if !self.transition(TaskState::Scheduled, TaskState::Running) {
            return;
        }
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let poll = {
            let _scope = relevance::enter(Ambient::for_task(self));
            let mut slot = self.future.lock();
            match slot.as_mut() {
                Some(future) => {
                    let poll = future.as_mut().poll(&mut cx);
                    if poll.is_ready() {
                        *slot = None;
                    }
                    poll
                }
                None => Poll::Ready(()),
            }
        };

        match poll {
            Poll::Ready(()) => {
                self.state.store(TaskState::Finished.as_u8(), Ordering::SeqCst);
                trace!(task = %self.id, node = %self.node, "task finished");
                if let Some(inner) = self.scheduler.upgrade() {
                    inner.complete_node(self.node);
                }
            }
            Poll::Pending => {
                if !self.transition(TaskState::Running, TaskState::Idle) {
                    // Woken during the poll.
                    self.state.store(TaskState::Scheduled.as_u8(), Ordering::SeqCst);
                    self.dispatch();
                }
            }
        }
    }
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl Drop for TaskCell {
    fn drop(&mut self) {
        if self.state() != TaskState::Finished {
            trace!(task = %self.id, node = %self.node, "task dropped before finishing");
            if let Some(inner) = self.scheduler.upgrade() {
                inner.complete_node(self.node);
            }
        }
    }
}

impl fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("state", &self.state())
            .field("on_affinity", &self.on_affinity())
            .finish()
    }
}

/// Where a task's outcome is parked until someone collects it.
pub(crate) struct ResultSlot<T> {
    state: Mutex<SlotState<T>>,
}

struct SlotState<T> {
    value: Option<SchedulerResult<T>>,
    waker: Option<Waker>,
    taken: bool,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                waker: None,
                taken: false,
            }),
        }
    }

    /// Store the outcome unless one was stored already.
    fn set(&self, value: SchedulerResult<T>) {
        let waker = {
            let mut state = self.state.lock();
            if state.value.is_some() || state.taken {
                return;
            }
            state.value = Some(value);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn take(&self) -> Option<SchedulerResult<T>> {
        let mut state = self.state.lock();
        let value = state.value.take();
        if value.is_some() {
            state.taken = true;
        }
        value
    }

    fn is_set(&self) -> bool {
        let state = self.state.lock();
        state.value.is_some() || state.taken
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<SchedulerResult<T>> {
        let mut state = self.state.lock();
        if let Some(value) = state.value.take() {
            state.taken = true;
            return Poll::Ready(value);
        }
        if state.taken {
            return Poll::Ready(Err(SchedulerError::TaskDropped));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Runs the user future, converting errors and panics into the task outcome.
struct Tracked<T> {
    future: Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>,
    slot: Arc<ResultSlot<T>>,
}

impl<T> Future for Tracked<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let polled = catch_unwind(AssertUnwindSafe(|| self.future.as_mut().poll(cx)));
        let outcome = match polled {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(Ok(value))) => Ok(value),
            Ok(Poll::Ready(Err(error))) => Err(SchedulerError::OperationFailed(error)),
            Err(payload) => Err(SchedulerError::from_panic(payload)),
        };
        self.slot.set(outcome);
        Poll::Ready(())
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.slot.set(Err(SchedulerError::TaskDropped));
    }
}

/// Handle to a task started with [`Scheduler::spawn`](super::Scheduler::spawn).
///
/// Awaiting it yields the task's outcome. Dropping it detaches the task.
pub struct TaskHandle<T> {
    slot: Arc<ResultSlot<T>>,
    node: NodeRef,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(slot: Arc<ResultSlot<T>>, node: NodeRef) -> Self {
        Self { slot, node }
    }

    /// The node tracking this task; pass it to
    /// [`Scheduler::join`](super::Scheduler::join) to let a blocked run
    /// service this task's affinity-thread work.
    #[inline]
    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// Whether the task has produced its outcome.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.slot.is_set()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = SchedulerResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take(cx)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("node", &self.node)
            .field("finished", &self.is_finished())
            .finish()
    }
}
