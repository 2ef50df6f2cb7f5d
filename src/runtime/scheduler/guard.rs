//! Join scope guards.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::runtime::dag::{EdgeId, NodeId};

use super::Inner;

/// Keeps one join edge alive. Dropping or [`release`](Self::release)-ing the
/// guard removes exactly that edge.
#[must_use = "the join is released as soon as the guard is dropped"]
pub struct JoinGuard {
    inner: Weak<Inner>,
    from: NodeId,
    /// `None` for a self-join or once released.
    edge: Option<EdgeId>,
}

impl JoinGuard {
    pub(crate) fn new(inner: &Arc<Inner>, from: NodeId, edge: Option<EdgeId>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            from,
            edge,
        }
    }

    /// Release the join now instead of at end of scope.
    pub fn release(mut self) {
        self.release_edge();
    }

    /// Whether this guard still holds an edge.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.edge.is_some()
    }

    fn release_edge(&mut self) {
        let Some(edge) = self.edge.take() else {
            return;
        };
        // The graph went away with the scheduler, edges included.
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = inner.graph.lock().unjoin(self.from, edge);
        if removed {
            debug!(from = %self.from, %edge, "join released");
        } else {
            warn!(from = %self.from, %edge, "join edge was already gone at release");
        }
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        self.release_edge();
    }
}

impl fmt::Debug for JoinGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinGuard")
            .field("from", &self.from)
            .field("edge", &self.edge)
            .finish()
    }
}
