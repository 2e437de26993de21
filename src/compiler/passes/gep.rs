//! Address computation lowering.
//!
//! Replaces every `getelementptr` with explicit integer arithmetic on the address-sized
//! integer type, using the backend's size and alignment model:
//!
//! ```text
//! %p = getelementptr { i32, float3 }, ptr %base, i32 %i, i32 1
//! ```
//! becomes
//! ```text
//! %b  = ptrtoint ptr %base to i64
//! %ix = sext i32 %i to i64
//! %o  = mul i64 %ix, 32
//! %a  = add i64 %b, %o
//! %a2 = add i64 %a, 16
//! %p  = inttoptr i64 %a2 to ptr
//! ```
//!
//! Constant indices are folded into one running byte offset added once at the end.

use crate::{
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{BinaryOp, CastOp, DataLayout, Function, InstId, Op, Type, Value},
    Result,
};

/// Lowers GEPs to integer address arithmetic.
pub struct GepLoweringPass;

impl Default for GepLoweringPass {
    fn default() -> Self {
        Self::new()
    }
}

impl GepLoweringPass {
    /// Creates a new GEP lowering pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn lower(func: &mut Function, id: InstId, layout: &DataLayout) -> Result<()> {
        let inst = func.inst(id).clone();
        let Op::Gep {
            source,
            base,
            indices,
            ..
        } = inst.op
        else {
            return Ok(());
        };
        if !func.value_type(base).is_ptr() {
            return Err(unsupported!(func, "getelementptr over a vector of pointers"));
        }

        let bits = layout.pointer_bits();
        let int_ty = Type::Int(bits);

        // Resolve strides first so the builder borrow does not overlap type queries.
        let mut steps: Vec<(Value, u64)> = Vec::with_capacity(indices.len());
        let mut constant_offset: i64 = 0;
        let mut current = source.clone();
        for (position, index) in indices.iter().enumerate() {
            let stride = if position == 0 {
                layout.stride_of(&current)
            } else {
                match current.clone() {
                    Type::Struct(fields) => {
                        let Some(field) = func
                            .const_int(*index)
                            .and_then(|f| usize::try_from(f).ok())
                            .filter(|f| *f < fields.len())
                        else {
                            return Err(unsupported!(
                                func,
                                "struct field index of {} is not a valid constant",
                                id
                            ));
                        };
                        constant_offset =
                            constant_offset.wrapping_add(layout.field_offset(&fields, field) as i64);
                        current = fields[field].clone();
                        continue;
                    }
                    Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                        let stride = layout.stride_of(&elem);
                        current = *elem;
                        stride
                    }
                    other => {
                        return Err(unsupported!(func, "getelementptr into scalar type {}", other));
                    }
                }
            };
            match func.const_int(*index) {
                Some(c) => {
                    constant_offset = constant_offset.wrapping_add(c.wrapping_mul(stride as i64));
                }
                None => steps.push((*index, stride)),
            }
        }

        let mut b = func.build_before(id)?;
        let mut address = b.cast(CastOp::PtrToInt, base, int_ty.clone());
        for (index, stride) in steps {
            let index_bits = b.function().value_type(index).int_bits().unwrap_or(bits);
            let index = match index_bits.cmp(&bits) {
                std::cmp::Ordering::Less => b.cast(CastOp::SExt, index, int_ty.clone()),
                std::cmp::Ordering::Greater => b.cast(CastOp::Trunc, index, int_ty.clone()),
                std::cmp::Ordering::Equal => index,
            };
            let scaled = if stride == 1 {
                index
            } else {
                let stride = b.const_int(bits, stride);
                b.binary(BinaryOp::Mul, index, stride)
            };
            address = b.binary(BinaryOp::Add, address, scaled);
        }
        if constant_offset != 0 {
            let offset = b.const_int(bits, constant_offset as u64);
            address = b.binary(BinaryOp::Add, address, offset);
        }
        let lowered = b.cast(CastOp::IntToPtr, address, inst.ty.clone());

        func.replace_all_uses(Value::Inst(id), lowered);
        func.remove(id);
        Ok(())
    }
}

impl FunctionPass for GepLoweringPass {
    fn name(&self) -> &'static str {
        "gep-lowering"
    }

    fn description(&self) -> &'static str {
        "Lowers address computations to integer arithmetic"
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let geps: Vec<InstId> = func
            .live_insts()
            .into_iter()
            .filter(|id| matches!(func.inst(*id).op, Op::Gep { .. }))
            .collect();
        if geps.is_empty() {
            return Ok(false);
        }
        for id in &geps {
            Self::lower(func, *id, &info.layout)?;
        }
        log::debug!("{}: {} address computations lowered", func.name(), geps.len());
        ctx.events
            .record(EventKind::AddressLowered)
            .function(func.name())
            .pass(self.name())
            .message(format!("{} getelementptr lowered", geps.len()));
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
            AddressSpace, Module, Param,
        },
        test::{create_kernel, create_module, global_ptr},
    };

    fn lower(module: &mut Module) -> bool {
        let info = ModuleInfo::of(module);
        let ctx = PassContext::new(PipelineConfig::default());
        GepLoweringPass::new()
            .run_on_function(module.function_mut("k").unwrap(), &info, &ctx)
            .unwrap()
    }

    /// Kernel storing `value` through `gep(source, out, indices(i))`; returns the module.
    fn store_through(
        ocl_version: u32,
        source: Type,
        indices: impl FnOnce(&mut crate::ir::InstBuilder<'_>) -> Vec<Value>,
    ) -> Module {
        let mut kernel = create_kernel("k", vec![global_ptr("out"), Param::new("i", Type::I32)]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let indices = indices(&mut b);
        let addr = b.gep(source, Value::Arg(0), indices);
        let marker = b.const_int(32, 0xdead_beef);
        b.store(marker, addr);
        b.ret(None);
        create_module(ocl_version, vec![kernel])
    }

    fn written_offset(module: &Module, i: i32) -> usize {
        let mut eval = Evaluator::new(module);
        let out = eval.memory.alloc(256);
        let EvalValue::Ptr { region, .. } = out else {
            panic!("pointer expected");
        };
        eval.run("k", vec![out, EvalValue::int(32, i as u32 as u64)])
            .unwrap();
        let bytes = eval.memory.region(region);
        bytes
            .windows(4)
            .position(|w| w == 0xdead_beefu32.to_le_bytes())
            .unwrap()
    }

    fn no_geps(module: &Module) -> bool {
        let func = module.function("k").unwrap();
        func.live_insts()
            .iter()
            .all(|id| !matches!(func.inst(*id).op, Op::Gep { .. }))
    }

    #[test]
    fn test_struct_and_array_offsets() {
        let record = Type::Struct(vec![
            Type::I32,
            Type::vector(Type::F32, 3),
            Type::array(Type::I32, 4),
        ]);
        let mut module = store_through(200, record, |b| {
            let one = b.const_int(32, 1);
            let two = b.const_int(32, 2);
            vec![one, two, Value::Arg(1)]
        });
        let before = written_offset(&module, 3);
        assert!(lower(&mut module));
        assert!(no_geps(&module));
        assert_eq!(written_offset(&module, 3), before);
        // record stride 48, array field at 32, element 3 at 12
        assert_eq!(before, 48 + 32 + 12);
    }

    #[test]
    fn test_struct_stride_padded_to_vector_alignment() {
        let record = Type::Struct(vec![Type::vector(Type::F32, 4), Type::F32]);
        let mut module = store_through(200, record, |b| {
            let one = b.const_int(32, 1);
            vec![Value::Arg(1), one]
        });
        assert!(lower(&mut module));
        assert!(no_geps(&module));
        // record stride 32, second field at 16
        assert_eq!(written_offset(&module, 1), 48);
        assert_eq!(written_offset(&module, 2), 80);
    }

    #[test]
    fn test_three_lane_vectors_stride_like_four() {
        let mut module = store_through(200, Type::vector(Type::F32, 3), |_| vec![Value::Arg(1)]);
        assert!(lower(&mut module));
        assert_eq!(written_offset(&module, 2), 32);
    }

    #[test]
    fn test_constant_indices_folded_once() {
        let mut module = store_through(200, Type::array(Type::I32, 8), |b| {
            let zero = b.const_int(32, 0);
            let five = b.const_int(32, 5);
            vec![zero, five]
        });
        assert!(lower(&mut module));
        let func = module.function("k").unwrap();
        let adds: Vec<_> = func
            .live_insts()
            .into_iter()
            .filter(|id| matches!(func.inst(*id).op, Op::Binary { op: BinaryOp::Add, .. }))
            .collect();
        assert_eq!(adds.len(), 1);
        assert_eq!(written_offset(&module, 0), 20);
    }

    #[test]
    fn test_address_width_follows_language_version() {
        for (version, bits) in [(120, 32), (200, 64)] {
            let mut module = store_through(version, Type::I32, |_| vec![Value::Arg(1)]);
            assert!(lower(&mut module));
            let func = module.function("k").unwrap();
            let widths: Vec<_> = func
                .live_insts()
                .into_iter()
                .filter(|id| {
                    matches!(
                        func.inst(*id).op,
                        Op::Cast {
                            op: CastOp::PtrToInt,
                            ..
                        }
                    )
                })
                .map(|id| func.inst(id).ty.clone())
                .collect();
            assert_eq!(widths, vec![Type::Int(bits)]);
        }
    }

    #[test]
    fn test_negative_index_sign_extended() {
        let mut kernel = create_kernel("k", vec![global_ptr("out"), Param::new("i", Type::I32)]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let eight = b.const_int(32, 8);
        let mid = b.gep(Type::I32, Value::Arg(0), vec![eight]);
        let back = b.gep(Type::I32, mid, vec![Value::Arg(1)]);
        let marker = b.const_int(32, 0xdead_beef);
        b.store(marker, back);
        b.ret(None);
        let mut module = create_module(200, vec![kernel]);
        assert!(lower(&mut module));
        assert_eq!(written_offset(&module, -3), 20);
    }

    #[test]
    fn test_variable_struct_index_rejected() {
        let mut kernel = create_kernel("k", vec![global_ptr("out"), Param::new("i", Type::I32)]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let zero = b.const_int(32, 0);
        b.gep(
            Type::Struct(vec![Type::I32, Type::I32]),
            Value::Arg(0),
            vec![zero, Value::Arg(1)],
        );
        b.ret(None);
        let mut module = create_module(200, vec![kernel]);
        let info = ModuleInfo::of(&module);
        let ctx = PassContext::new(PipelineConfig::default());
        assert!(GepLoweringPass::new()
            .run_on_function(module.function_mut("k").unwrap(), &info, &ctx)
            .is_err());
        assert_eq!(
            Type::Ptr(AddressSpace::Global),
            module.function("k").unwrap().params()[0].ty
        );
    }
}
