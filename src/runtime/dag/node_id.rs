//! Identifiers for the dependency graph
//!
//! Task nodes and join edges are referenced by small copyable handles rather
//! than pointers, so the graph may contain cycles without ownership cycles.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unique identifier for a task node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Create a new NodeId with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_pump::runtime::dag::NodeId;
    ///
    /// let id = NodeId::new(42);
    /// assert_eq!(id.value(), 42);
    /// ```
    #[inline]
    pub fn new(value: usize) -> Self {
        NodeId(value)
    }

    /// Returns the inner value of the node ID.
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Identifier of one join edge.
///
/// Every `join` call mints a fresh edge id, so two joins between the same pair
/// of nodes are two distinct edges and each release removes only its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

/// Generator for creating unique node and edge IDs.
///
/// # Examples
///
/// ```
/// use affinity_pump::runtime::dag::NodeIdGenerator;
///
/// let generator = NodeIdGenerator::new();
/// let id1 = generator.generate();
/// let id2 = generator.generate();
/// assert_ne!(id1, id2);
/// ```
#[derive(Debug)]
pub struct NodeIdGenerator {
    next_node: AtomicUsize,
    next_edge: AtomicUsize,
}

impl NodeIdGenerator {
    /// Create a new ID generator.
    #[inline]
    pub fn new() -> Self {
        Self {
            next_node: AtomicUsize::new(0),
            next_edge: AtomicUsize::new(0),
        }
    }

    /// Generate a new unique node ID.
    #[inline]
    pub fn generate(&self) -> NodeId {
        NodeId(self.next_node.fetch_add(1, Ordering::Relaxed))
    }

    /// Generate a new unique edge ID.
    #[inline]
    pub fn generate_edge(&self) -> EdgeId {
        EdgeId(self.next_edge.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
