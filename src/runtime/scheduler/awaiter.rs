//! Awaitables that move a task between the affinity thread and the workers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tracing::trace;

use crate::runtime::error::{SchedulerError, SchedulerResult};

use super::relevance;
use super::Inner;

/// Future returned by
/// [`Scheduler::switch_to_affinity_thread`](super::Scheduler::switch_to_affinity_thread).
///
/// Resolves immediately on the affinity thread. Elsewhere the awaiting task is
/// queued on its own node and resumes once a pump loop that can reach that
/// node services it.
///
/// Holds the scheduler weakly: a suspended switch does not keep a dropped
/// scheduler alive, it fails with [`SchedulerError::SchedulerShutDown`].
#[must_use = "futures do nothing unless awaited"]
pub struct SwitchToAffinity {
    inner: Weak<Inner>,
}

impl SwitchToAffinity {
    pub(crate) fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    /// Whether awaiting would complete without suspending.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.is_affinity_thread() && !inner.is_shut_down())
    }
}

impl Future for SwitchToAffinity {
    type Output = SchedulerResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = self.inner.upgrade().filter(|inner| !inner.is_shut_down()) else {
            return Poll::Ready(Err(SchedulerError::SchedulerShutDown));
        };
        let task = relevance::current_task(inner.id());
        if inner.is_affinity_thread() {
            if let Some(task) = task {
                task.set_on_affinity(true);
            }
            return Poll::Ready(Ok(()));
        }
        let Some(task) = task else {
            return Poll::Ready(Err(SchedulerError::NoAmbientTask));
        };
        trace!(task = %task.id(), node = %task.node(), "requesting affinity thread");
        task.set_on_affinity(true);
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

impl fmt::Debug for SwitchToAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchToAffinity")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Future returned by
/// [`Scheduler::switch_to_background`](super::Scheduler::switch_to_background).
///
/// Moves the awaiting task onto the worker pool. Off the affinity thread, a
/// task that is already background-bound continues without suspending.
#[must_use = "futures do nothing unless awaited"]
pub struct SwitchToBackground {
    inner: Weak<Inner>,
    requested: bool,
}

impl SwitchToBackground {
    pub(crate) fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            requested: false,
        }
    }
}

impl Future for SwitchToBackground {
    type Output = SchedulerResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.requested {
            return Poll::Ready(Ok(()));
        }
        let Some(inner) = self.inner.upgrade() else {
            return Poll::Ready(Err(SchedulerError::SchedulerShutDown));
        };
        let on_affinity_thread = inner.is_affinity_thread();
        let Some(task) = relevance::current_task(inner.id()) else {
            return if on_affinity_thread {
                Poll::Ready(Err(SchedulerError::NoAmbientTask))
            } else {
                Poll::Ready(Ok(()))
            };
        };
        if !on_affinity_thread && !task.on_affinity() {
            return Poll::Ready(Ok(()));
        }
        trace!(task = %task.id(), node = %task.node(), "leaving affinity thread");
        task.set_on_affinity(false);
        self.requested = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

impl fmt::Debug for SwitchToBackground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchToBackground")
            .field("requested", &self.requested)
            .finish()
    }
}

/// Re-queue the awaiting task once at its current location.
///
/// On the affinity thread this gives other reachable work a turn.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
