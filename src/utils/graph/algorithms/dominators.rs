//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` passes
//! through `d`. The **immediate dominator** of `n` is the closest strict dominator; making it
//! the parent of `n` forms the dominator tree rooted at the entry.
//!
//! # Algorithm
//!
//! The iterative scheme of Cooper, Harvey and Kennedy: immediate dominators are refined in
//! reverse post-order by intersecting the dominator chains of processed predecessors until a
//! fixpoint is reached. Control flow graphs of kernels are small and mostly reducible, where
//! this converges in two or three sweeps.
//!
//! Nodes unreachable from the entry have no dominator and are dominated by nothing.

use crate::utils::graph::{
    algorithms::reverse_postorder, NodeId, RootedGraph,
};

/// Result of dominator tree computation.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator per node; the entry maps to itself, unreachable nodes to `None`
    idom: Vec<Option<NodeId>>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry and unreachable nodes.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            None
        } else {
            self.idom.get(node.index()).copied().flatten()
        }
    }

    /// Returns true when `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom.get(node.index()).is_some_and(Option::is_some)
    }

    /// Checks if node `a` dominates node `b`. A reachable node dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(idom) => current = idom,
                None => return false,
            }
        }
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Children of a node in the dominator tree, by ascending index.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.idom.len())
            .map(NodeId::new)
            .filter(|n| *n != self.entry && self.idom[n.index()] == Some(node))
            .collect()
    }

    /// Returns the number of nodes covered by the tree.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree of a rooted graph.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
///
/// # Complexity
///
/// O(V + E) per sweep; the number of sweeps is bounded by the loop nesting depth plus two for
/// reducible graphs.
pub fn compute_dominators<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    let entry = graph.entry();
    let node_count = graph.node_count();
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() >= node_count {
        return DominatorTree { entry, idom };
    }

    let rpo = reverse_postorder(graph, entry);
    let mut order = vec![usize::MAX; node_count];
    for (i, node) in rpo.iter().enumerate() {
        order[node.index()] = i;
    }
    idom[entry.index()] = Some(entry);

    let intersect = |idom: &[Option<NodeId>], mut a: NodeId, mut b: NodeId| -> NodeId {
        while a != b {
            while order[a.index()] > order[b.index()] {
                a = idom[a.index()].unwrap_or(entry);
            }
            while order[b.index()] > order[a.index()] {
                b = idom[b.index()].unwrap_or(entry);
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree { entry, idom }
}
