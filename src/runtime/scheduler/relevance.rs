//! Relevance context
//!
//! Which node is "current" is a property of the work being executed, not of
//! the thread executing it. The scheduler installs an ambient frame for exactly
//! the duration of one poll or one work item and restores the previous frame
//! afterwards, so the value follows a task as it migrates between threads and
//! nested runs on one thread unwind in stack order.
//!
//! Suppression depth is carried by the task cell when there is one, so a
//! suppression scope held across an await survives migration. Outside a task
//! it falls back to a per-frame counter.

use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::runtime::dag::NodeId;

use super::task::TaskCell;

/// The frame installed while a task or work item runs.
#[derive(Clone)]
pub(crate) struct Ambient {
    pub(crate) scheduler: u64,
    pub(crate) node: NodeId,
    pub(crate) task: Option<Arc<TaskCell>>,
}

impl Ambient {
    pub(crate) fn for_task(task: &Arc<TaskCell>) -> Self {
        Self {
            scheduler: task.scheduler_id(),
            node: task.node(),
            task: Some(task.clone()),
        }
    }

    pub(crate) fn for_node(scheduler: u64, node: NodeId) -> Self {
        Self {
            scheduler,
            node,
            task: None,
        }
    }

    fn is_suppressed(&self) -> bool {
        match &self.task {
            Some(task) => task.suppression().load(Ordering::SeqCst) > 0,
            None => SUPPRESSED.with(|s| s.get() > 0),
        }
    }
}

thread_local! {
    static AMBIENT: RefCell<Option<Ambient>> = const { RefCell::new(None) };
    static SUPPRESSED: Cell<usize> = const { Cell::new(0) };
}

/// Restores the previous frame when dropped.
pub(crate) struct AmbientScope {
    previous: Option<Ambient>,
    previous_suppressed: usize,
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|slot| *slot.borrow_mut() = previous);
        SUPPRESSED.with(|s| s.set(self.previous_suppressed));
    }
}

/// Install `ambient` as the current frame until the returned scope drops.
pub(crate) fn enter(ambient: Ambient) -> AmbientScope {
    let previous = AMBIENT.with(|slot| slot.borrow_mut().replace(ambient));
    let previous_suppressed = SUPPRESSED.with(|s| s.replace(0));
    AmbientScope {
        previous,
        previous_suppressed,
    }
}

/// The current frame, if it belongs to `scheduler`.
pub(crate) fn current_for(scheduler: u64) -> Option<Ambient> {
    AMBIENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|a| a.scheduler == scheduler)
            .cloned()
    })
}

/// The task being polled, if it belongs to `scheduler`.
pub(crate) fn current_task(scheduler: u64) -> Option<Arc<TaskCell>> {
    current_for(scheduler).and_then(|a| a.task)
}

/// The node a new node should be linked under: the ambient node of
/// `scheduler`, unless relevance is currently suppressed.
pub(crate) fn parent_for(scheduler: u64) -> Option<NodeId> {
    current_for(scheduler)
        .filter(|a| !a.is_suppressed())
        .map(|a| a.node)
}

/// A scope during which newly created nodes are not linked to the ambient
/// node. Scopes nest; each guard undoes exactly its own increment.
#[must_use = "relevance is only suppressed while the guard is alive"]
pub struct RelevanceSuppression {
    target: SuppressionTarget,
}

enum SuppressionTarget {
    Task(Arc<TaskCell>),
    Frame,
}

impl RelevanceSuppression {
    pub(crate) fn begin(scheduler: u64) -> Self {
        let target = match current_task(scheduler) {
            Some(task) => {
                task.suppression().fetch_add(1, Ordering::SeqCst);
                SuppressionTarget::Task(task)
            }
            None => {
                SUPPRESSED.with(|s| s.set(s.get() + 1));
                SuppressionTarget::Frame
            }
        };
        Self { target }
    }
}

impl Drop for RelevanceSuppression {
    fn drop(&mut self) {
        match &self.target {
            SuppressionTarget::Task(task) => {
                task.suppression().fetch_sub(1, Ordering::SeqCst);
            }
            SuppressionTarget::Frame => {
                SUPPRESSED.with(|s| s.set(s.get().saturating_sub(1)));
            }
        }
    }
}

impl std::fmt::Debug for RelevanceSuppression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target {
            SuppressionTarget::Task(_) => "task",
            SuppressionTarget::Frame => "frame",
        };
        f.debug_struct("RelevanceSuppression")
            .field("target", &target)
            .finish()
    }
}
