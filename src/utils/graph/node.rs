//! Node identifier for directed graphs.
//!
//! [`NodeId`] is a strongly-typed index into a graph's node set. The control flow graph of a
//! function uses the block index as node id, so conversions to and from
//! [`crate::ir::BlockId`] are free.

use std::fmt;

use crate::ir::BlockId;

/// A strongly-typed identifier for nodes within a directed graph.
///
/// Node ids are dense: a graph with `n` nodes uses ids `0..n`, which lets analyses store
/// per-node results in plain vectors indexed by [`NodeId::index`].
///
/// # Examples
///
/// ```rust
/// use genlower::utils::graph::NodeId;
///
/// let node = NodeId::new(3);
/// assert_eq!(node.index(), 3);
/// assert_eq!(node.to_string(), "n3");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<BlockId> for NodeId {
    #[inline]
    fn from(block: BlockId) -> Self {
        NodeId(block.index())
    }
}

impl From<NodeId> for BlockId {
    #[inline]
    fn from(node: NodeId) -> Self {
        BlockId::new(node.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new(3), NodeId::new(1), NodeId::new(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_node_id_block_conversion() {
        let block = BlockId::new(7);
        let node = NodeId::from(block);
        assert_eq!(node.index(), 7);
        assert_eq!(BlockId::from(node), block);
    }

    #[test]
    fn test_node_id_hash() {
        let set: HashSet<NodeId> = [NodeId::new(1), NodeId::new(1), NodeId::new(2)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(format!("{:?}", NodeId::new(4)), "NodeId(4)");
    }
}
