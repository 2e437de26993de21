//! Generic directed graph infrastructure for program analysis.
//!
//! # Architecture
//!
//! - **Core Types**: [`NodeId`] identifies nodes by dense index
//! - **Traits**: [`GraphBase`], [`Successors`], [`Predecessors`] and [`RootedGraph`] abstract
//!   over graph representations
//! - **Algorithms**: traversal orders and dominator trees in [`algorithms`]
//!
//! The main implementor is [`crate::analysis::ControlFlowGraph`], a snapshot of the block
//! structure of one function.

pub mod algorithms;
mod node;
mod traits;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};

#[cfg(test)]
pub(crate) mod test_graph {
    use super::{GraphBase, NodeId, Predecessors, RootedGraph, Successors};

    /// Adjacency-list graph for algorithm tests; node 0 is the entry.
    pub struct TestGraph {
        succs: Vec<Vec<NodeId>>,
    }

    impl TestGraph {
        pub fn new(nodes: usize, edges: &[(usize, usize)]) -> Self {
            let mut succs = vec![Vec::new(); nodes];
            for (from, to) in edges {
                succs[*from].push(NodeId::new(*to));
            }
            Self { succs }
        }
    }

    impl GraphBase for TestGraph {
        fn node_count(&self) -> usize {
            self.succs.len()
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.succs.len()).map(NodeId::new)
        }
    }

    impl Successors for TestGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.succs[node.index()].iter().copied()
        }
    }

    impl Predecessors for TestGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.succs
                .iter()
                .enumerate()
                .filter(move |(_, s)| s.contains(&node))
                .map(|(i, _)| NodeId::new(i))
        }
    }

    impl RootedGraph for TestGraph {
        fn entry(&self) -> NodeId {
            NodeId::new(0)
        }
    }
}
