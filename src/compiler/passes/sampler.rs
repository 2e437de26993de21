//! Sampler predicate folding.
//!
//! The image builtins ask two questions about a sampler through the placeholder calls
//! `__gen_ocl_sampler_need_fix` and `__gen_ocl_sampler_need_rounding_fix`. When the sampler
//! is a compile-time constant the answer is folded to a boolean; otherwise it is computed
//! with a mask and a compare on the sampler's integer encoding.

use crate::{
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{BinaryOp, Callee, Constant, Function, InstId, IntPredicate, Op, Type, Value},
    Result,
};

const ADDRESS_MASK: u64 = 0x70;
const ADDRESS_CLAMP: u64 = 0x40;
const FILTER_MASK: u64 = 0x300;
const FILTER_NEAREST: u64 = 0x0;
const NORMALIZED_COORDS_TRUE: u64 = 0x1;

const SAMPLER_INITIALIZER: &str = "__translate_sampler_initializer";
const SAMPLER_TO_INT: &str = "__gen_ocl_sampler_to_int";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    /// Clamp addressing combined with nearest filtering.
    NeedFix,
    /// Unnormalized coordinates.
    NeedRoundingFix,
}

impl Predicate {
    fn of(name: &str) -> Option<Self> {
        match name {
            "__gen_ocl_sampler_need_fix" => Some(Self::NeedFix),
            "__gen_ocl_sampler_need_rounding_fix" => Some(Self::NeedRoundingFix),
            _ => None,
        }
    }

    fn fold(self, sampler: u64) -> bool {
        match self {
            Self::NeedFix => {
                sampler & ADDRESS_MASK == ADDRESS_CLAMP && sampler & FILTER_MASK == FILTER_NEAREST
            }
            Self::NeedRoundingFix => sampler & NORMALIZED_COORDS_TRUE == 0,
        }
    }
}

/// Replaces sampler predicate calls with constants or inline tests.
pub struct SamplerFoldingPass;

impl Default for SamplerFoldingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerFoldingPass {
    /// Creates a new sampler folding pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn predicate_call(func: &Function, id: InstId) -> Option<(Predicate, Value)> {
        let Op::Call {
            callee: Callee::Direct(name),
            args,
            ..
        } = &func.inst(id).op
        else {
            return None;
        };
        Some((Predicate::of(name)?, *args.first()?))
    }

    /// The sampler's constant encoding, looking through the initializer call on 2.0 modules.
    fn constant_sampler(func: &Function, info: &ModuleInfo, sampler: Value) -> Option<u64> {
        if let Some(value) = func.const_int(sampler) {
            return Some(value as u64 & 0xffff_ffff);
        }
        if !info.is_ocl20() {
            return None;
        }
        match func.def_op(sampler)? {
            Op::Call {
                callee: Callee::Direct(name),
                args,
                ..
            } if name == SAMPLER_INITIALIZER => {
                func.const_int(*args.first()?).map(|v| v as u64 & 0xffff_ffff)
            }
            _ => None,
        }
    }

    fn expand(func: &mut Function, id: InstId, predicate: Predicate, sampler: Value) -> Result<Value> {
        let is_int = func.value_type(sampler) == Type::I32;
        let mut b = func.build_before(id)?;
        let encoded = if is_int {
            sampler
        } else {
            b.call(SAMPLER_TO_INT, vec![sampler], Type::I32)
        };
        let result = match predicate {
            Predicate::NeedFix => {
                let mask = b.const_int(32, ADDRESS_MASK);
                let clamp = b.const_int(32, ADDRESS_CLAMP);
                let address = b.binary(BinaryOp::And, encoded, mask);
                let is_clamp = b.icmp(IntPredicate::Eq, address, clamp);
                let mask = b.const_int(32, FILTER_MASK);
                let nearest = b.const_int(32, FILTER_NEAREST);
                let filter = b.binary(BinaryOp::And, encoded, mask);
                let is_nearest = b.icmp(IntPredicate::Eq, filter, nearest);
                b.binary(BinaryOp::And, is_clamp, is_nearest)
            }
            Predicate::NeedRoundingFix => {
                let mask = b.const_int(32, NORMALIZED_COORDS_TRUE);
                let zero = b.const_int(32, 0);
                let normalized = b.binary(BinaryOp::And, encoded, mask);
                b.icmp(IntPredicate::Eq, normalized, zero)
            }
        };
        Ok(result)
    }
}

impl FunctionPass for SamplerFoldingPass {
    fn name(&self) -> &'static str {
        "sampler-folding"
    }

    fn description(&self) -> &'static str {
        "Folds sampler predicate calls"
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let calls: Vec<(InstId, Predicate, Value)> = func
            .live_insts()
            .into_iter()
            .filter_map(|id| Self::predicate_call(func, id).map(|(p, s)| (id, p, s)))
            .collect();
        if calls.is_empty() {
            return Ok(false);
        }

        for (id, predicate, sampler) in &calls {
            let (replacement, how) = match Self::constant_sampler(func, info, *sampler) {
                Some(encoded) => {
                    let folded = predicate.fold(encoded);
                    log::trace!("{}: {predicate:?}({encoded:#x}) = {folded}", func.name());
                    (
                        func.constant(Constant::int(1, u64::from(folded))),
                        format!("{predicate:?} folded to {folded}"),
                    )
                }
                None => (
                    Self::expand(func, *id, *predicate, *sampler)?,
                    format!("{predicate:?} expanded"),
                ),
            };
            func.replace_all_uses(Value::Inst(*id), replacement);
            func.remove(*id);
            ctx.events
                .record(EventKind::SamplerFolded)
                .function(func.name())
                .pass(self.name())
                .message(how);
        }
        log::debug!("{}: {} sampler predicates rewritten", func.name(), calls.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        ir::{
            eval::{EvalValue, Evaluator},
            AddressSpace, CastOp, Module, Param,
        },
        test::{create_kernel, create_module, global_ptr},
    };

    fn fold(module: &mut Module) -> (bool, PassContext) {
        let info = ModuleInfo::of(module);
        let ctx = PassContext::new(PipelineConfig::default());
        let changed = SamplerFoldingPass::new()
            .run_on_function(module.function_mut("k").unwrap(), &info, &ctx)
            .unwrap();
        (changed, ctx)
    }

    /// Kernel storing `zext(predicate(sampler))` to `out[0]`; `sampler` builds the argument.
    fn predicate_kernel(
        ocl_version: u32,
        predicate: &str,
        sampler_param: Type,
        sampler: impl FnOnce(&mut crate::ir::InstBuilder<'_>) -> Value,
    ) -> Module {
        let mut kernel = create_kernel("k", vec![global_ptr("out"), Param::new("s", sampler_param)]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let s = sampler(&mut b);
        let answer = b.call(predicate, vec![s], Type::BOOL);
        let widened = b.cast(CastOp::ZExt, answer, Type::I32);
        b.store(widened, Value::Arg(0));
        b.ret(None);
        create_module(ocl_version, vec![kernel])
    }

    /// Raw bits of the folded `i1` feeding the zext.
    fn folded_constant(module: &Module) -> Option<u64> {
        let func = module.function("k").unwrap();
        func.live_insts().into_iter().find_map(|id| match &func.inst(id).op {
            Op::Cast {
                op: CastOp::ZExt,
                value,
                ..
            } => func
                .as_constant(*value)
                .and_then(crate::ir::Constant::as_int)
                .and_then(crate::ir::ApInt::to_u64),
            _ => None,
        })
    }

    fn stored(module: &Module, sampler: u64) -> u32 {
        let mut eval = Evaluator::new(module);
        let out = eval.memory.alloc(4);
        let EvalValue::Ptr { region, .. } = out else {
            panic!("pointer expected");
        };
        eval.run("k", vec![out, EvalValue::int(32, sampler)]).unwrap();
        let bytes = eval.memory.region(region);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn test_constant_sampler_folds() {
        let cases = [
            ("__gen_ocl_sampler_need_fix", 0x40, 1),
            ("__gen_ocl_sampler_need_fix", 0x41, 1),
            ("__gen_ocl_sampler_need_fix", 0x140, 0),
            ("__gen_ocl_sampler_need_fix", 0x20, 0),
            ("__gen_ocl_sampler_need_rounding_fix", 0x40, 1),
            ("__gen_ocl_sampler_need_rounding_fix", 0x41, 0),
        ];
        for (predicate, sampler, expected) in cases {
            let mut module = predicate_kernel(120, predicate, Type::I32, |b| b.const_int(32, sampler));
            let (changed, ctx) = fold(&mut module);
            assert!(changed);
            assert_eq!(folded_constant(&module), Some(expected), "{predicate}({sampler:#x})");
            assert_eq!(ctx.events.count_kind(EventKind::SamplerFolded), 1);
        }
    }

    #[test]
    fn test_initializer_folds_on_ocl20() {
        let mut module = predicate_kernel(
            200,
            "__gen_ocl_sampler_need_fix",
            Type::I32,
            |b| {
                let encoded = b.const_int(32, 0x40);
                b.call(SAMPLER_INITIALIZER, vec![encoded], Type::Ptr(AddressSpace::Constant))
            },
        );
        assert!(fold(&mut module).0);
        assert_eq!(folded_constant(&module), Some(1));
    }

    #[test]
    fn test_initializer_ignored_before_ocl20() {
        let mut module = predicate_kernel(
            120,
            "__gen_ocl_sampler_need_rounding_fix",
            Type::I32,
            |b| {
                let encoded = b.const_int(32, 0x40);
                b.call(SAMPLER_INITIALIZER, vec![encoded], Type::Ptr(AddressSpace::Constant))
            },
        );
        assert!(fold(&mut module).0);
        let func = module.function("k").unwrap();
        let conversions = func
            .live_insts()
            .into_iter()
            .filter(|id| {
                matches!(&func.inst(*id).op,
                    Op::Call { callee: Callee::Direct(name), .. } if name == SAMPLER_TO_INT)
            })
            .count();
        assert_eq!(conversions, 1);
    }

    #[test]
    fn test_runtime_sampler_expanded() {
        for (predicate, answers) in [
            (
                "__gen_ocl_sampler_need_fix",
                [(0x40, 1), (0x41, 1), (0x140, 0), (0x20, 0)],
            ),
            (
                "__gen_ocl_sampler_need_rounding_fix",
                [(0x40, 1), (0x41, 0), (0x0, 1), (0x3, 0)],
            ),
        ] {
            let mut module = predicate_kernel(120, predicate, Type::I32, |_| Value::Arg(1));
            assert!(fold(&mut module).0);
            assert_eq!(folded_constant(&module), None);
            for (sampler, expected) in answers {
                assert_eq!(stored(&module, sampler), expected, "{predicate}({sampler:#x})");
            }
        }
    }

    #[test]
    fn test_unrelated_calls_untouched() {
        let mut module = predicate_kernel(120, "get_global_id", Type::I32, |_| Value::Arg(1));
        let before = module.clone();
        assert!(!fold(&mut module).0);
        assert_eq!(module, before);
    }
}
