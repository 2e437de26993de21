//! Control flow graph snapshot of a function.
//!
//! [`ControlFlowGraph`] copies the successor and predecessor relation of a function's blocks
//! so analyses can run while the function itself is being rewritten. Any pass that changes
//! branch targets or adds blocks must build a new snapshot.

use std::sync::OnceLock;

use crate::{
    analysis::cfg::{detect_loops, LoopForest},
    ir::{BlockId, Function},
    utils::graph::{
        algorithms::{self, DominatorTree},
        GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
};

/// A control flow graph over the blocks of one function.
///
/// # Lazy Computation
///
/// - [`dominators`](Self::dominators) - Dominator tree (computed on first access)
/// - [`loops`](Self::loops) - Natural loop forest (computed on first access)
///
/// # Examples
///
/// ```rust
/// use genlower::analysis::ControlFlowGraph;
/// use genlower::ir::{Function, Type};
///
/// let mut func = Function::new("f", vec![], Type::Void);
/// let entry = func.add_block("entry");
/// let exit = func.add_block("exit");
/// func.build_at_end(entry).br(exit);
/// func.build_at_end(exit).ret(None);
///
/// let cfg = ControlFlowGraph::from_function(&func);
/// assert_eq!(cfg.reverse_postorder(), vec![entry, exit]);
/// ```
#[derive(Debug)]
pub struct ControlFlowGraph {
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
    dominators: OnceLock<DominatorTree>,
    loops: OnceLock<LoopForest>,
}

impl ControlFlowGraph {
    /// Builds the graph from the current block structure of `func`.
    #[must_use]
    pub fn from_function(func: &Function) -> Self {
        let count = func.block_count();
        let mut succs = vec![Vec::new(); count];
        let mut preds = vec![Vec::new(); count];
        for block in func.block_ids() {
            for succ in func.successors(block) {
                succs[block.index()].push(NodeId::from(succ));
                preds[succ.index()].push(NodeId::from(block));
            }
        }
        Self {
            succs,
            preds,
            dominators: OnceLock::new(),
            loops: OnceLock::new(),
        }
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.succs.len()
    }

    /// Successor blocks of `block`.
    #[must_use]
    pub fn block_successors(&self, block: BlockId) -> Vec<BlockId> {
        self.succs[block.index()].iter().map(|n| BlockId::from(*n)).collect()
    }

    /// Predecessor blocks of `block`.
    #[must_use]
    pub fn block_predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.preds[block.index()].iter().map(|n| BlockId::from(*n)).collect()
    }

    /// Blocks reachable from the entry in reverse post-order.
    ///
    /// Unreachable blocks are omitted.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        if self.succs.is_empty() {
            return Vec::new();
        }
        algorithms::reverse_postorder(self, self.entry())
            .into_iter()
            .map(BlockId::from)
            .collect()
    }

    /// Dominator tree, computed on first access.
    pub fn dominators(&self) -> &DominatorTree {
        self.dominators
            .get_or_init(|| algorithms::compute_dominators(self))
    }

    /// Natural loop forest, computed on first access.
    pub fn loops(&self) -> &LoopForest {
        self.loops
            .get_or_init(|| detect_loops(self, self.dominators()))
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.succs.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.succs.len()).map(NodeId::new)
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.succs[node.index()].iter().copied()
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds[node.index()].iter().copied()
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IntPredicate, Param, Type, Value};

    #[test]
    fn test_diamond_function() {
        let mut func = Function::new("f", vec![Param::new("a", Type::I32)], Type::Void);
        let entry = func.add_block("entry");
        let left = func.add_block("left");
        let right = func.add_block("right");
        let join = func.add_block("join");
        let mut b = func.build_at_end(entry);
        let zero = b.const_int(32, 0);
        let cond = b.icmp(IntPredicate::Eq, Value::Arg(0), zero);
        b.cond_br(cond, left, right);
        func.build_at_end(left).br(join);
        func.build_at_end(right).br(join);
        func.build_at_end(join).ret(None);

        let cfg = ControlFlowGraph::from_function(&func);
        assert_eq!(cfg.block_predecessors(join), vec![left, right]);
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo.first(), Some(&entry));
        assert_eq!(rpo.last(), Some(&join));
        assert_eq!(
            cfg.dominators().immediate_dominator(NodeId::from(join)),
            Some(NodeId::from(entry))
        );
        assert!(cfg.loops().is_empty());
    }
}
