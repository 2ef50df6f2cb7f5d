//! Dependency graph of tracked work
//!
//! This module provides the data structures the pump loop consults to decide
//! which affinity-thread work is relevant to a blocking wait.
//!
//! # Architecture
//!
//! - [`NodeId`](node_id::NodeId) / [`EdgeId`](node_id::EdgeId) - Handles for nodes and join edges
//! - [`NodeIdGenerator`](node_id::NodeIdGenerator) - Thread-safe ID generator
//! - [`TaskNode`](node::TaskNode) - One unit of tracked work and its FIFO work queue
//! - [`DependencyGraph`](graph::DependencyGraph) - All live nodes, ancestry links and join edges
//! - [`DAGError`](graph::DAGError) - Errors that can occur when manipulating the graph

pub mod graph;
pub mod node;
pub mod node_id;

pub use graph::{DAGError, DependencyGraph, ServiceCursor};
pub use node::TaskNode;
pub use node_id::{EdgeId, NodeId, NodeIdGenerator};
