//! Task node record
//!
//! One unit of tracked work: its affinity-thread work queue, its outgoing join
//! edges, and the ancestry links used for implicit relevance.

use std::collections::VecDeque;
use std::fmt;

use indexmap::{IndexMap, IndexSet};

use super::node_id::{EdgeId, NodeId};

/// A node in the dependency graph.
///
/// `W` is the work item type held in the node's queue.
pub struct TaskNode<W> {
    /// Unique identifier for this node
    id: NodeId,

    /// The node that was ambient when this one was created (relationship only)
    parent: Option<NodeId>,

    /// Nodes created under this one; visible to this node's pump without a join
    children: IndexSet<NodeId>,

    /// Outgoing join edges, keyed by edge so parallel edges stay distinct
    joins: IndexMap<EdgeId, NodeId>,

    /// Pending affinity-thread work, FIFO
    queue: VecDeque<W>,

    /// Set once when the node's body has run to completion
    completed: bool,

    /// Work items dequeued from this node that are still executing
    in_flight: usize,
}

impl<W> TaskNode<W> {
    /// Create a new node.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_pump::runtime::dag::{NodeId, TaskNode};
    ///
    /// let node: TaskNode<u32> = TaskNode::new(NodeId(0), None);
    /// assert!(node.queue_is_empty());
    /// assert!(!node.is_completed());
    /// ```
    #[inline]
    pub fn new(id: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            parent,
            children: IndexSet::new(),
            joins: IndexMap::new(),
            queue: VecDeque::new(),
            completed: false,
            in_flight: 0,
        }
    }

    /// Get the node's unique identifier.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the creator of this node, if it was linked to one.
    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    /// Nodes created under this node.
    #[inline]
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().copied()
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.shift_remove(&child);
    }

    /// Targets of the outgoing join edges (one entry per edge).
    #[inline]
    pub fn joined(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.joins.values().copied()
    }

    /// Number of outgoing join edges.
    #[inline]
    pub fn num_joins(&self) -> usize {
        self.joins.len()
    }

    pub(crate) fn add_join(&mut self, edge: EdgeId, to: NodeId) {
        self.joins.insert(edge, to);
    }

    pub(crate) fn remove_join(&mut self, edge: EdgeId) -> Option<NodeId> {
        self.joins.shift_remove(&edge)
    }

    /// Append a work item to the tail of the queue.
    #[inline]
    pub fn enqueue(&mut self, item: W) {
        self.queue.push_back(item);
    }

    /// Pop the work item at the head of the queue.
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<W> {
        self.queue.pop_front()
    }

    /// Number of queued work items.
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn drain_queue(&mut self) -> impl Iterator<Item = W> + '_ {
        self.queue.drain(..)
    }

    /// Check whether the node's body has completed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn mark_completed(&mut self) -> bool {
        let first = !self.completed;
        self.completed = true;
        first
    }

    pub(crate) fn begin_item(&mut self) {
        self.in_flight += 1;
    }

    pub(crate) fn end_item(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// A completed node with nothing queued or executing can be dropped.
    #[inline]
    pub fn is_reapable(&self) -> bool {
        self.completed && self.queue.is_empty() && self.in_flight == 0
    }
}

impl<W> fmt::Debug for TaskNode<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("joins", &self.joins)
            .field("queued", &self.queue.len())
            .field("completed", &self.completed)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl<W> fmt::Display for TaskNode<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskNode({}, queued={})", self.id, self.queue.len())
    }
}
