//! Natural loop analysis.
//!
//! # Loop Structure
//!
//! ```text
//!     [preheader]     <- Single entry predecessor (optional)
//!          |
//!          v
//!     [header] <------+  <- Single entry point, dominates all loop nodes
//!          |          |
//!          v          |
//!     [body ...]      |
//!          |          |
//!          v          |
//!     [latch] --------+  <- Back edge source(s)
//!          |
//!          v
//!     [exit ...]         <- Blocks outside the loop with a predecessor inside
//! ```
//!
//! On top of the structural forest this module recognizes simple induction variables
//! (`phi(init, phi ± constant)`) and evaluates constant trip counts by stepping the induction
//! variable through the exit comparison.
//!
//! [`detect_loops`] works on any graph implementing the graph traits; the induction and trip
//! count queries need the [`Function`] the graph was built from.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ir::{ApInt, BinaryOp, BlockId, Function, IntPredicate, Op, Value},
    utils::graph::{algorithms::DominatorTree, GraphBase, NodeId, Predecessors, Successors},
};

/// Maximum number of evaluation steps when computing a trip count.
const TRIP_COUNT_STEP_LIMIT: u64 = 1 << 16;

/// Exit edge information for a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopExit {
    /// The block inside the loop that branches out.
    pub exiting_block: NodeId,
    /// The block outside the loop that is the exit target.
    pub exit_block: NodeId,
}

/// Classification of induction variable update operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InductionUpdateKind {
    /// `i = i + stride`
    Add,
    /// `i = i - stride`
    Sub,
}

/// A basic induction variable: a header phi advanced by a constant every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductionVar {
    /// The phi node at the loop header.
    pub phi: Value,
    /// Value entering the loop.
    pub init: Value,
    /// The updated value flowing back along the latch edge.
    pub update: Value,
    /// The type of update operation.
    pub update_kind: InductionUpdateKind,
    /// The stride, if it is a constant.
    pub stride: Option<i64>,
}

/// Structural information about one natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// The header block (single entry point, dominates all loop nodes).
    pub header: NodeId,
    /// All blocks in the loop body (including header).
    pub body: BTreeSet<NodeId>,
    /// Back edge sources.
    pub latches: Vec<NodeId>,
    /// Single out-of-loop predecessor of the header, if there is exactly one.
    pub preheader: Option<NodeId>,
    /// Exit edges from the loop.
    pub exits: Vec<LoopExit>,
    /// Loop nesting depth (0 = outermost).
    pub depth: usize,
    /// Parent loop header, if this loop is nested.
    pub parent: Option<NodeId>,
    /// Immediate child loop headers.
    pub children: Vec<NodeId>,
}

impl LoopInfo {
    /// Creates a new `LoopInfo` with the given header.
    #[must_use]
    pub fn new(header: NodeId) -> Self {
        Self {
            header,
            body: BTreeSet::from([header]),
            latches: Vec::new(),
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Header as a block id.
    #[must_use]
    pub fn header_block(&self) -> BlockId {
        BlockId::from(self.header)
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }

    /// Returns the number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns the single latch if there is exactly one.
    #[must_use]
    pub fn single_latch(&self) -> Option<NodeId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// Returns true if this is an innermost loop (no children).
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }

    /// Distinct blocks inside the loop that branch out, by ascending index.
    #[must_use]
    pub fn exiting_blocks(&self) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.exits.iter().map(|e| e.exiting_block).collect();
        set.into_iter().collect()
    }

    /// The block whose execution count defines the trip count.
    ///
    /// This is the latch when it exits the loop, otherwise the unique exiting block.
    #[must_use]
    pub fn counting_block(&self) -> Option<NodeId> {
        if let Some(latch) = self.single_latch() {
            if self.exits.iter().any(|e| e.exiting_block == latch) {
                return Some(latch);
            }
        }
        match self.exiting_blocks().as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Blocks of this loop that do not belong to any nested loop.
    #[must_use]
    pub fn own_blocks(&self, forest: &LoopForest) -> Vec<NodeId> {
        let nested: BTreeSet<NodeId> = self
            .children
            .iter()
            .filter_map(|child| forest.loop_for_header(*child))
            .flat_map(|child| child.body.iter().copied())
            .collect();
        self.body
            .iter()
            .copied()
            .filter(|b| !nested.contains(b))
            .collect()
    }

    /// Finds the basic induction variables of this loop.
    ///
    /// A header phi qualifies when it has exactly one incoming value from outside the loop
    /// and the incoming values from inside are all the same `phi + c` or `phi - c`.
    #[must_use]
    pub fn find_induction_vars(&self, func: &Function) -> Vec<InductionVar> {
        let mut vars = Vec::new();
        for id in func.block_insts(self.header_block()) {
            let Op::Phi { incoming } = &func.inst(*id).op else {
                continue;
            };
            let phi = Value::Inst(*id);
            let (inside, outside): (Vec<_>, Vec<_>) = incoming
                .iter()
                .partition(|(_, block)| self.contains(NodeId::from(*block)));
            let [(init, _)] = outside.as_slice() else {
                continue;
            };
            let Some((update, _)) = inside.first() else {
                continue;
            };
            if inside.iter().any(|(v, _)| v != update) {
                continue;
            }
            let (update_kind, stride) = match func.def_op(*update) {
                Some(Op::Binary {
                    op: BinaryOp::Add,
                    lhs,
                    rhs,
                }) if *lhs == phi || *rhs == phi => {
                    let other = if *lhs == phi { *rhs } else { *lhs };
                    (InductionUpdateKind::Add, func.const_int(other))
                }
                Some(Op::Binary {
                    op: BinaryOp::Sub,
                    lhs,
                    rhs,
                }) if *lhs == phi => (InductionUpdateKind::Sub, func.const_int(*rhs)),
                _ => continue,
            };
            vars.push(InductionVar {
                phi,
                init: *init,
                update: *update,
                update_kind,
                stride,
            });
        }
        vars
    }

    /// Evaluates the constant trip count: the number of times the counting block executes.
    ///
    /// Returns `None` when the exit condition is not a comparison of a constant-stride
    /// induction variable (or its update) against a constant, when the initial value is not
    /// constant, or when the loop does not terminate within the evaluation limit.
    #[must_use]
    pub fn trip_count(&self, func: &Function) -> Option<u64> {
        let exiting = BlockId::from(self.counting_block()?);
        let term = func.terminator(exiting)?;
        let Op::CondBr {
            cond,
            on_true,
            on_false,
        } = &func.inst(term).op
        else {
            return None;
        };
        let stays_on_true = self.contains(NodeId::from(*on_true));
        if stays_on_true == self.contains(NodeId::from(*on_false)) {
            return None;
        }
        let Some(Op::ICmp { pred, lhs, rhs }) = func.def_op(*cond) else {
            return None;
        };

        for var in self.find_induction_vars(func) {
            let (counter, bound, pred) = if *lhs == var.phi || *lhs == var.update {
                (*lhs, *rhs, *pred)
            } else if *rhs == var.phi || *rhs == var.update {
                (*rhs, *lhs, pred.swapped())
            } else {
                continue;
            };
            let bits = func.value_type(counter).int_bits()?;
            let init = func.as_constant(var.init)?.as_int()?.clone();
            let bound = func.as_constant(bound)?.as_int()?.clone();
            let stride = ApInt::from_i64(bits, var.stride?);
            let step = |v: &ApInt| match var.update_kind {
                InductionUpdateKind::Add => v.wrapping_add(&stride),
                InductionUpdateKind::Sub => v.wrapping_sub(&stride),
            };

            let mut current = init;
            for executions in 1..=TRIP_COUNT_STEP_LIMIT {
                let compared = if counter == var.phi {
                    current.clone()
                } else {
                    step(&current)
                };
                let taken = evaluate_predicate(pred, &compared, &bound);
                if taken != stays_on_true {
                    return Some(executions);
                }
                current = step(&current);
            }
            return None;
        }
        None
    }
}

fn evaluate_predicate(pred: IntPredicate, lhs: &ApInt, rhs: &ApInt) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    let ord = if pred.is_signed() {
        lhs.scmp(rhs)
    } else {
        lhs.ucmp(rhs)
    };
    match pred {
        IntPredicate::Eq => ord == Equal,
        IntPredicate::Ne => ord != Equal,
        IntPredicate::Ugt | IntPredicate::Sgt => ord == Greater,
        IntPredicate::Uge | IntPredicate::Sge => ord != Less,
        IntPredicate::Ult | IntPredicate::Slt => ord == Less,
        IntPredicate::Ule | IntPredicate::Sle => ord != Greater,
    }
}

/// Loop forest containing all loops in a function.
#[derive(Debug, Clone)]
pub struct LoopForest {
    loops: Vec<LoopInfo>,
    /// Innermost loop index per block
    block_to_loop: Vec<Option<usize>>,
}

impl LoopForest {
    /// Creates an empty loop forest.
    #[must_use]
    pub fn new(block_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            block_to_loop: vec![None; block_count],
        }
    }

    /// Adds a loop to the forest.
    pub fn add_loop(&mut self, loop_info: LoopInfo) {
        let loop_idx = self.loops.len();
        for &block in &loop_info.body {
            let Some(slot) = self.block_to_loop.get_mut(block.index()) else {
                continue;
            };
            match *slot {
                Some(existing) if self.loops[existing].depth >= loop_info.depth => {}
                _ => *slot = Some(loop_idx),
            }
        }
        self.loops.push(loop_info);
    }

    /// Returns all loops, ordered by header index.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Returns the innermost loop containing the given block.
    #[must_use]
    pub fn innermost_loop(&self, block: NodeId) -> Option<&LoopInfo> {
        self.block_to_loop
            .get(block.index())
            .copied()
            .flatten()
            .map(|idx| &self.loops[idx])
    }

    /// Returns the loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: NodeId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }

    /// Returns the enclosing loop of `loop_info`.
    #[must_use]
    pub fn parent(&self, loop_info: &LoopInfo) -> Option<&LoopInfo> {
        loop_info.parent.and_then(|p| self.loop_for_header(p))
    }

    /// Returns the loop depth for a block (0 if not in any loop).
    #[must_use]
    pub fn loop_depth(&self, block: NodeId) -> usize {
        self.innermost_loop(block).map_or(0, |l| l.depth + 1)
    }

    /// Returns loops sorted innermost first (deepest nesting first, then by header).
    #[must_use]
    pub fn by_depth_descending(&self) -> Vec<&LoopInfo> {
        let mut sorted: Vec<_> = self.loops.iter().collect();
        sorted.sort_by_key(|l| (std::cmp::Reverse(l.depth), l.header));
        sorted
    }
}

/// Detects all natural loops in a graph using dominance-based back edge detection.
///
/// # Algorithm
///
/// 1. Finds back edges using dominance (n → h where h dominates n)
/// 2. For each back edge, computes the natural loop body
/// 3. Computes preheaders and exits
/// 4. Establishes nesting relationships
#[must_use]
pub fn detect_loops<G>(graph: &G, dominators: &DominatorTree) -> LoopForest
where
    G: GraphBase + Successors + Predecessors,
{
    let mut loops_by_header: BTreeMap<NodeId, LoopInfo> = BTreeMap::new();

    for node in graph.node_ids() {
        for succ in graph.successors(node) {
            if dominators.dominates(succ, node) {
                let loop_info = loops_by_header
                    .entry(succ)
                    .or_insert_with(|| LoopInfo::new(succ));
                loop_info.latches.push(node);
                expand_loop_body(graph, loop_info, node);
            }
        }
    }

    for loop_info in loops_by_header.values_mut() {
        compute_preheader(graph, loop_info);
        compute_exits(graph, loop_info);
    }

    let mut loops: Vec<LoopInfo> = loops_by_header.into_values().collect();
    compute_nesting(&mut loops);

    let mut forest = LoopForest::new(graph.node_count());
    for loop_info in loops {
        forest.add_loop(loop_info);
    }
    forest
}

/// Adds every node that reaches the latch without passing through the header.
fn expand_loop_body<G>(graph: &G, loop_info: &mut LoopInfo, latch: NodeId)
where
    G: Predecessors,
{
    let mut worklist = vec![latch];
    while let Some(node) = worklist.pop() {
        if loop_info.body.insert(node) {
            for pred in graph.predecessors(node) {
                if pred != loop_info.header && !loop_info.body.contains(&pred) {
                    worklist.push(pred);
                }
            }
        }
    }
}

fn compute_preheader<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Predecessors,
{
    let outside: Vec<NodeId> = graph
        .predecessors(loop_info.header)
        .filter(|p| !loop_info.body.contains(p))
        .collect();
    loop_info.preheader = match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    };
}

fn compute_exits<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Successors,
{
    let mut exits = Vec::new();
    for &block in &loop_info.body {
        for succ in graph.successors(block) {
            if !loop_info.body.contains(&succ) {
                exits.push(LoopExit {
                    exiting_block: block,
                    exit_block: succ,
                });
            }
        }
    }
    loop_info.exits = exits;
}

/// Parent = smallest other loop whose body contains this loop's header.
fn compute_nesting(loops: &mut [LoopInfo]) {
    let n = loops.len();
    for i in 0..n {
        let header = loops[i].header;
        let parent = (0..n)
            .filter(|j| *j != i && loops[*j].body.contains(&header) && loops[*j].header != header)
            .min_by_key(|j| loops[*j].body.len())
            .map(|j| loops[j].header);
        loops[i].parent = parent;
    }
    for i in 0..n {
        let header = loops[i].header;
        loops[i].children = loops
            .iter()
            .filter(|l| l.parent == Some(header))
            .map(|l| l.header)
            .collect();
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(p) = current {
            depth += 1;
            current = loops.iter().find(|l| l.header == p).and_then(|l| l.parent);
        }
        loops[i].depth = depth;
    }
}
