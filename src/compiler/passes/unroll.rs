//! Forced unrolling hints for loops touching private memory.
//!
//! Private arrays indexed by a loop counter force the backend to spill them to scratch
//! memory. Fully unrolling such loops turns the indices into constants and lets the arrays
//! live in registers. This pass does not unroll anything itself; it attaches an
//! [`LoopHint::UnrollEnable`] directive that the backend's unroller honours.
//!
//! # Policy
//!
//! Loops are visited innermost first:
//!
//! 1. A loop that already carries a directive is left alone.
//! 2. A loop whose own trip count exceeds the ceiling is not marked.
//! 3. The trip counts of the enclosing loops are multiplied in, outwards. When the product
//!    exceeds the ceiling, the enclosing loop that overflowed is withdrawn from consideration
//!    and the current loop is not marked either. Unknown trip counts count as zero.
//! 4. A loop whose own blocks (excluding nested loops) load or store private memory is
//!    marked.

use std::collections::BTreeSet;

use crate::{
    analysis::{ControlFlowGraph, LoopForest, LoopInfo},
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext, DEFAULT_UNROLL_CEILING},
    ir::{AddressSpace, BlockId, Function, LoopHint, Op},
    utils::graph::NodeId,
    Result,
};

/// Marks small loops over private memory for forced unrolling.
pub struct LoopUnrollAdvisorPass {
    ceiling: u64,
}

impl Default for LoopUnrollAdvisorPass {
    fn default() -> Self {
        Self::new(DEFAULT_UNROLL_CEILING)
    }
}

impl LoopUnrollAdvisorPass {
    /// Creates the pass with the given trip count product ceiling.
    #[must_use]
    pub fn new(ceiling: u64) -> Self {
        Self { ceiling }
    }

    fn trip_count(func: &Function, info: &LoopInfo) -> u64 {
        info.trip_count(func).unwrap_or(0)
    }

    /// Walks the enclosing loops; returns the header of the loop that overflowed the ceiling.
    fn overflowing_parent(&self, func: &Function, forest: &LoopForest, info: &LoopInfo) -> Option<NodeId> {
        let mut product = Self::trip_count(func, info);
        let mut current = info;
        while let Some(parent) = forest.parent(current) {
            let parent_trips = Self::trip_count(func, parent);
            if parent_trips != 0 && product.saturating_mul(parent_trips) > self.ceiling {
                return Some(parent.header);
            }
            product = product.saturating_mul(parent_trips);
            current = parent;
        }
        None
    }

    fn touches_private_memory(func: &Function, forest: &LoopForest, info: &LoopInfo) -> bool {
        info.own_blocks(forest).into_iter().any(|node| {
            func.block_insts(BlockId::from(node)).iter().any(|id| {
                let ptr = match &func.inst(*id).op {
                    Op::Load { ptr, .. } | Op::Store { ptr, .. } => *ptr,
                    _ => return false,
                };
                func.value_type(ptr).address_space() == Some(AddressSpace::Private)
            })
        })
    }
}

impl FunctionPass for LoopUnrollAdvisorPass {
    fn name(&self) -> &'static str {
        "loop-unroll-advisor"
    }

    fn description(&self) -> &'static str {
        "Requests full unrolling of small loops over private memory"
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        _info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let cfg = ControlFlowGraph::from_function(func);
        let forest = cfg.loops();
        let mut withdrawn: BTreeSet<NodeId> = BTreeSet::new();
        let mut marked = Vec::new();

        for info in forest.by_depth_descending() {
            let header = info.header_block();
            if withdrawn.contains(&info.header) || func.loop_hints.contains_key(&header) {
                continue;
            }
            let trips = Self::trip_count(func, info);
            if trips > self.ceiling {
                log::trace!("{}: loop at {} runs {trips} times, not unrolled", func.name(), header);
                continue;
            }
            if let Some(parent) = self.overflowing_parent(func, forest, info) {
                log::trace!(
                    "{}: loop nest around {} exceeds {} iterations",
                    func.name(),
                    header,
                    self.ceiling
                );
                withdrawn.insert(parent);
                continue;
            }
            if Self::touches_private_memory(func, forest, info) {
                marked.push((header, trips));
            }
        }

        for (header, trips) in &marked {
            func.loop_hints.insert(*header, LoopHint::UnrollEnable);
            ctx.events
                .record(EventKind::LoopMarked)
                .function(func.name())
                .pass(self.name())
                .message(format!("loop at {header} (trip count {trips}) marked for unrolling"));
        }
        if !marked.is_empty() {
            log::debug!("{}: {} loops marked for unrolling", func.name(), marked.len());
        }
        Ok(!marked.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        ir::{BinaryOp, InstBuilder, IntPredicate, Type, Value},
        test::{counted_loop_nest, create_kernel, create_module, global_ptr},
    };

    fn advise(func: &mut Function, ceiling: u64) -> (bool, PassContext) {
        let info = ModuleInfo::of(&create_module(200, vec![]));
        let ctx = PassContext::new(PipelineConfig::default());
        let changed = LoopUnrollAdvisorPass::new(ceiling)
            .run_on_function(func, &info, &ctx)
            .unwrap();
        (changed, ctx)
    }

    #[test]
    fn test_small_nest_inner_loop_marked() {
        let (mut func, outer, inner) = counted_loop_nest(6, 4);
        let (changed, ctx) = advise(&mut func, 32);
        assert!(changed);
        assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollEnable));
        // the outer loop's own blocks do not touch private memory
        assert_eq!(func.loop_hints.get(&outer), None);
        assert_eq!(ctx.events.count_kind(EventKind::LoopMarked), 1);
    }

    #[test]
    fn test_nest_product_over_ceiling_not_marked() {
        let (mut func, _, _) = counted_loop_nest(6, 8);
        let (changed, _) = advise(&mut func, 32);
        assert!(!changed);
        assert!(func.loop_hints.is_empty());
    }

    /// Adds a private store to the outer loop's own latch block.
    fn store_private_in_latch(func: &mut Function) {
        let blocks: Vec<BlockId> = func.block_ids().collect();
        let (entry, latch) = (blocks[0], blocks[3]);
        let buf = Value::Inst(func.block_insts(entry)[0]);
        let mut b = InstBuilder::at(func, latch, 0);
        let seven = b.const_int(32, 7);
        b.store(seven, buf);
    }

    #[test]
    fn test_outer_loop_with_private_access_marked() {
        let (mut func, outer, inner) = counted_loop_nest(6, 4);
        store_private_in_latch(&mut func);
        let (changed, ctx) = advise(&mut func, 32);
        assert!(changed);
        assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollEnable));
        assert_eq!(func.loop_hints.get(&outer), Some(&LoopHint::UnrollEnable));
        assert_eq!(ctx.events.count_kind(EventKind::LoopMarked), 2);
    }

    #[test]
    fn test_withdrawn_outer_loop_not_marked() {
        // 6 * 8 overflows at the outer loop, which on its own would qualify
        let (mut func, outer, inner) = counted_loop_nest(6, 8);
        store_private_in_latch(&mut func);
        let (changed, _) = advise(&mut func, 32);
        assert!(!changed);
        assert_eq!(func.loop_hints.get(&inner), None);
        assert_eq!(func.loop_hints.get(&outer), None);
    }

    #[test]
    fn test_long_loop_skipped_and_ceiling_configurable() {
        let (mut func, _, inner) = counted_loop_nest(1, 40);
        assert!(!advise(&mut func, 32).0);
        assert!(advise(&mut func, 64).0);
        assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollEnable));
    }

    #[test]
    fn test_existing_directive_respected() {
        let (mut func, _, inner) = counted_loop_nest(6, 4);
        func.loop_hints.insert(inner, LoopHint::UnrollDisable);
        assert!(!advise(&mut func, 32).0);
        assert_eq!(func.loop_hints.get(&inner), Some(&LoopHint::UnrollDisable));
    }

    #[test]
    fn test_loop_without_private_access_ignored() {
        let mut func = create_kernel("k", vec![global_ptr("out")]);
        let entry = func.add_block("entry");
        let body = func.add_block("body");
        let exit = func.add_block("exit");
        let mut b = func.build_at_end(entry);
        let zero = b.const_int(32, 0);
        b.br(body);
        let mut b = func.build_at_end(body);
        let i = b.phi(Type::I32, vec![(zero, entry)]);
        b.store(i, Value::Arg(0));
        let one = b.const_int(32, 1);
        let next = b.binary(BinaryOp::Add, i, one);
        let four = b.const_int(32, 4);
        let more = b.icmp(IntPredicate::Slt, next, four);
        b.cond_br(more, body, exit);
        func.build_at_end(exit).ret(None);
        crate::test::add_incoming(&mut func, i, next, body);

        assert!(!advise(&mut func, 32).0);
    }
}
