//! Dependency graph of task nodes
//!
//! Holds every live [`TaskNode`] together with the two kinds of edges the pump
//! loop follows: ancestry (parent to child, recorded when a node is created
//! under an ambient node) and join edges (added and removed explicitly).
//! Join edges may form cycles, so every traversal is guarded by a visited set.
//!
//! The graph itself is not synchronized; the scheduler owns it behind a single
//! mutex and only holds that lock for one structural update or traversal.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::trace;

use super::node::TaskNode;
use super::node_id::{EdgeId, NodeId, NodeIdGenerator};

/// Errors that can occur when manipulating the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DAGError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

/// Where a pump loop resumes its scan of reachable queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceCursor {
    last: Option<NodeId>,
    position: usize,
}

impl ServiceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node serviced most recently, if any.
    #[inline]
    pub fn last(&self) -> Option<NodeId> {
        self.last
    }
}

/// The set of live task nodes and their edges.
pub struct DependencyGraph<W> {
    nodes: IndexMap<NodeId, TaskNode<W>>,
    ids: NodeIdGenerator,
}

impl<W> DependencyGraph<W> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            ids: NodeIdGenerator::new(),
        }
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[inline]
    pub fn get_node(&self, id: NodeId) -> Result<&TaskNode<W>, DAGError> {
        self.nodes.get(&id).ok_or(DAGError::NodeNotFound(id))
    }

    /// Register a new node.
    ///
    /// When `parent` names a live node the new node becomes its child and is
    /// therefore visible to the parent's pump loop without a join. A parent
    /// that has already been reaped is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_pump::runtime::dag::DependencyGraph;
    ///
    /// let mut graph: DependencyGraph<u32> = DependencyGraph::new();
    /// let root = graph.create_node(None);
    /// let child = graph.create_node(Some(root));
    /// assert!(graph.reachable(root).contains(&child));
    /// assert!(!graph.reachable(child).contains(&root));
    /// ```
    pub fn create_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.ids.generate();
        let parent = parent.filter(|p| self.nodes.contains_key(p));
        if let Some(p) = parent {
            if let Some(node) = self.nodes.get_mut(&p) {
                node.add_child(id);
            }
        }
        self.nodes.insert(id, TaskNode::new(id, parent));
        trace!(node = %id, parent = ?parent, "node created");
        id
    }

    /// Add a join edge `from -> to`.
    ///
    /// Returns the edge id to release later, or `None` when `from == to`
    /// (a node always reaches itself, so there is nothing to add). The target
    /// does not have to be alive: an edge to a reaped node is simply never
    /// followed.
    pub fn join(&mut self, from: NodeId, to: NodeId) -> Result<Option<EdgeId>, DAGError> {
        if from == to {
            return if self.nodes.contains_key(&from) {
                Ok(None)
            } else {
                Err(DAGError::NodeNotFound(from))
            };
        }
        let edge = self.ids.generate_edge();
        let node = self
            .nodes
            .get_mut(&from)
            .ok_or(DAGError::NodeNotFound(from))?;
        node.add_join(edge, to);
        trace!(from = %from, to = %to, edge = %edge, "join edge added");
        Ok(Some(edge))
    }

    /// Remove exactly the edge minted by a previous [`join`](Self::join).
    ///
    /// Returns `false` if the edge no longer exists (already released, or its
    /// source node has been reaped). No other edge is touched either way.
    pub fn unjoin(&mut self, from: NodeId, edge: EdgeId) -> bool {
        let removed = self
            .nodes
            .get_mut(&from)
            .and_then(|node| node.remove_join(edge));
        match removed {
            Some(to) => {
                trace!(from = %from, to = %to, edge = %edge, "join edge released");
                true
            }
            None => false,
        }
    }

    /// Every live node reachable from `from`, in breadth-first order.
    ///
    /// Follows child links and join edges; the visited set makes cycles
    /// harmless. `from` itself comes first when it is alive.
    pub fn reachable(&self, from: NodeId) -> IndexSet<NodeId> {
        let mut visited = IndexSet::new();
        if !self.nodes.contains_key(&from) {
            return visited;
        }
        visited.insert(from);
        let mut cursor = 0;
        while let Some(&id) = visited.get_index(cursor) {
            cursor += 1;
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for next in node.children().chain(node.joined()) {
                if self.nodes.contains_key(&next) {
                    visited.insert(next);
                }
            }
        }
        visited
    }

    /// Append a work item to a node's queue.
    ///
    /// Hands the item back if the node no longer exists.
    pub fn enqueue(&mut self, node: NodeId, item: W) -> Result<(), W> {
        match self.nodes.get_mut(&node) {
            Some(n) => {
                n.enqueue(item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Whether any queue reachable from `from` holds work.
    pub fn has_reachable_work(&self, from: NodeId) -> bool {
        self.reachable(from)
            .iter()
            .any(|id| self.nodes.get(id).is_some_and(|n| !n.queue_is_empty()))
    }

    /// Pop one item from some queue reachable from `from`.
    ///
    /// Scanning resumes just after the queue serviced last and wraps, so a
    /// queue that keeps refilling cannot starve its siblings. The node the item
    /// came from is marked busy until [`finish_item`](Self::finish_item) is
    /// called.
    pub fn dequeue_reachable(
        &mut self,
        from: NodeId,
        cursor: &mut ServiceCursor,
    ) -> Option<(NodeId, W)> {
        let reachable = self.reachable(from);
        let n = reachable.len();
        if n == 0 {
            return None;
        }
        // A reaped node's successor has shifted into its slot.
        let start = match cursor.last.and_then(|id| reachable.get_index_of(&id)) {
            Some(i) => i + 1,
            None => cursor.position,
        };
        for k in 0..n {
            let idx = (start + k) % n;
            let id = reachable[idx];
            if let Some(node) = self.nodes.get_mut(&id) {
                if let Some(item) = node.try_dequeue() {
                    node.begin_item();
                    cursor.last = Some(id);
                    cursor.position = idx;
                    return Some((id, item));
                }
            }
        }
        None
    }

    /// Record that an item dequeued from `node` has finished running.
    pub fn finish_item(&mut self, node: NodeId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.end_item();
        }
        self.try_reap(node);
    }

    /// Mark a node's body as completed.
    ///
    /// Returns `true` the first time. A missing node counts as completed.
    pub fn complete(&mut self, node: NodeId) -> bool {
        let first = match self.nodes.get_mut(&node) {
            Some(n) => n.mark_completed(),
            None => false,
        };
        self.try_reap(node);
        first
    }

    /// Whether `node` has completed; reaped nodes have.
    #[inline]
    pub fn is_completed(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_none_or(|n| n.is_completed())
    }

    /// Take every queued item out of every node.
    pub fn drain_all(&mut self) -> Vec<W> {
        let mut items = Vec::new();
        for node in self.nodes.values_mut() {
            items.extend(node.drain_queue());
        }
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.try_reap(id);
        }
        items
    }

    /// Drop a finished node, splicing its children onto its parent so that
    /// grandchildren stay visible to the grandparent.
    fn try_reap(&mut self, id: NodeId) {
        if !self.nodes.get(&id).is_some_and(|n| n.is_reapable()) {
            return;
        }
        let Some(node) = self.nodes.shift_remove(&id) else {
            return;
        };
        let parent = node.parent().filter(|p| self.nodes.contains_key(p));
        let orphans: Vec<NodeId> = node.children().collect();
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.remove_child(id);
            for &child in &orphans {
                p.add_child(child);
            }
        }
        for child in orphans {
            if let Some(c) = self.nodes.get_mut(&child) {
                c.set_parent(parent);
            }
        }
        trace!(node = %id, "node reaped");
    }
}

impl<W> Default for DependencyGraph<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> std::fmt::Debug for DependencyGraph<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.values().collect::<Vec<_>>())
            .finish()
    }
}
