//! Graph traversal algorithms.
//!
//! # Algorithms
//!
//! - [`postorder`] - Depth-first search with post-order visitation
//! - [`reverse_postorder`] - Reverse post-order (useful for forward data flow)
//!
//! Both return collected vectors since the order requires a full traversal anyway.

use crate::utils::graph::{NodeId, Successors};

/// Computes the post-order of the nodes reachable from `start`.
///
/// Every node appears after all of its DFS-tree descendants.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Computes the reverse post-order of the nodes reachable from `start`.
///
/// In an acyclic region every node comes before its successors, which makes this the
/// iteration order for forward rewrites that must see definitions before uses.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::test_graph::TestGraph;

    fn ids(raw: &[usize]) -> Vec<NodeId> {
        raw.iter().map(|i| NodeId::new(*i)).collect()
    }

    #[test]
    fn test_postorder_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[3, 1, 2, 0]));
    }

    #[test]
    fn test_postorder_linear() {
        let graph = TestGraph::new(3, &[(0, 1), (1, 2)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[2, 1, 0]));
        assert_eq!(reverse_postorder(&graph, NodeId::new(0)), ids(&[0, 1, 2]));
    }

    #[test]
    fn test_reverse_postorder_with_loop() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let rpo = reverse_postorder(&graph, NodeId::new(0));
        assert_eq!(rpo, ids(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_unreachable_and_invalid_start() {
        let graph = TestGraph::new(3, &[(0, 1)]);
        assert_eq!(postorder(&graph, NodeId::new(0)).len(), 2);
        assert!(postorder(&graph, NodeId::new(9)).is_empty());
    }
}
