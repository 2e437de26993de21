//! Constant expression expansion.
//!
//! The backend only understands plain constants. A constant expression (for example the
//! address of a global converted to an integer and offset) is rebuilt here as ordinary
//! instructions placed before its user.
//!
//! # Example
//!
//! Before:
//! ```text
//! %v = add i64 ptrtoint (ptr addrspace(1) @table to i64), %i
//! ```
//!
//! After:
//! ```text
//! %e = ptrtoint ptr addrspace(1) @table to i64
//! %v = add i64 %e, %i
//! ```
//!
//! # Placement
//!
//! - Ordinary operands: immediately before the using instruction.
//! - Phi operands: before the terminator of the incoming block. Every incoming entry of the
//!   same phi from that block that carries the same constant is rewritten to the same
//!   materialized value.
//! - Constant vectors that contain an expression are rebuilt lane by lane with an
//!   `insertelement` chain starting from undef.
//! - Landing pad clauses must stay constant and are left untouched.

use crate::{
    compiler::{EventKind, FunctionPass, ModuleInfo, PassContext},
    ir::{ConstExpr, Constant, Function, InstBuilder, InstId, Op, Value},
    Result,
};

/// Materializes constant expressions as instructions.
pub struct ConstantExpansionPass;

impl Default for ConstantExpansionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantExpansionPass {
    /// Creates a new constant expansion pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns true when `constant` must be rebuilt as instructions.
    fn needs_expansion(constant: &Constant) -> bool {
        match constant {
            Constant::Expr(_) => true,
            Constant::Vector(lanes) => lanes.iter().any(Self::needs_expansion),
            _ => false,
        }
    }

    /// Emits instructions computing `constant` at the builder's position.
    fn materialize(b: &mut InstBuilder<'_>, constant: &Constant) -> Value {
        match constant {
            Constant::Expr(expr) => match expr.as_ref() {
                ConstExpr::Cast { op, value, ty } => {
                    let value = Self::materialize(b, value);
                    b.cast(*op, value, ty.clone())
                }
                ConstExpr::Binary { op, lhs, rhs } => {
                    let lhs = Self::materialize(b, lhs);
                    let rhs = Self::materialize(b, rhs);
                    b.binary(*op, lhs, rhs)
                }
                ConstExpr::ICmp { pred, lhs, rhs } => {
                    let lhs = Self::materialize(b, lhs);
                    let rhs = Self::materialize(b, rhs);
                    b.icmp(*pred, lhs, rhs)
                }
                ConstExpr::Gep {
                    source,
                    base,
                    indices,
                } => {
                    let base = Self::materialize(b, base);
                    let indices = indices.iter().map(|i| Self::materialize(b, i)).collect();
                    b.gep(source.clone(), base, indices)
                }
            },
            Constant::Vector(lanes) if Self::needs_expansion(constant) => {
                let lanes: Vec<Value> = lanes.iter().map(|l| Self::materialize(b, l)).collect();
                b.build_vector(constant.ty(), &lanes)
            }
            other => b.constant(other.clone()),
        }
    }

    fn expand_operands(func: &mut Function, id: InstId, ctx: &PassContext) -> Result<bool> {
        let mut operands = func.inst(id).op.operands();
        operands.sort();
        operands.dedup();

        let mut changed = false;
        for operand in operands {
            let Some(constant) = func.as_constant(operand).cloned() else {
                continue;
            };
            if !Self::needs_expansion(&constant) {
                continue;
            }
            let expanded = Self::materialize(&mut func.build_before(id)?, &constant);
            func.inst_mut(id).op.replace_operand(operand, expanded);
            log::trace!("{}: expanded constant operand of {}", func.name(), id);
            ctx.events
                .record(EventKind::ConstantExpanded)
                .function(func.name())
                .message(format!("operand of {id} materialized as {expanded:?}"));
            changed = true;
        }
        Ok(changed)
    }

    fn expand_phi(func: &mut Function, id: InstId, ctx: &PassContext) -> Result<bool> {
        let Op::Phi { incoming } = &func.inst(id).op else {
            return Ok(false);
        };
        let incoming = incoming.clone();
        let mut changed = false;
        for (position, (value, block)) in incoming.iter().enumerate() {
            let Some(constant) = func.as_constant(*value).cloned() else {
                continue;
            };
            if !Self::needs_expansion(&constant) {
                continue;
            }
            // An earlier entry from the same block may already have been rewritten.
            let current = match &func.inst(id).op {
                Op::Phi { incoming } => incoming[position].0,
                _ => continue,
            };
            if func.as_constant(current) != Some(&constant) {
                continue;
            }
            let Some(terminator) = func.terminator(*block) else {
                continue;
            };
            let expanded = Self::materialize(&mut func.build_before(terminator)?, &constant);

            let consts: Vec<Option<Constant>> = match &func.inst(id).op {
                Op::Phi { incoming } => incoming
                    .iter()
                    .map(|(v, _)| func.as_constant(*v).cloned())
                    .collect(),
                _ => Vec::new(),
            };
            if let Op::Phi { incoming } = &mut func.inst_mut(id).op {
                for ((v, b), c) in incoming.iter_mut().zip(consts) {
                    if b == block && c.as_ref() == Some(&constant) {
                        *v = expanded;
                    }
                }
            }
            ctx.events
                .record(EventKind::ConstantExpanded)
                .function(func.name())
                .message(format!("phi {id} incoming from {block} materialized"));
            changed = true;
        }
        Ok(changed)
    }
}

impl FunctionPass for ConstantExpansionPass {
    fn name(&self) -> &'static str {
        "constexpr-expansion"
    }

    fn description(&self) -> &'static str {
        "Materializes constant expressions as instructions"
    }

    fn run_on_function(
        &self,
        func: &mut Function,
        _info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool> {
        let mut changed = false;
        for id in func.live_insts() {
            let op = &func.inst(id).op;
            if matches!(op, Op::LandingPad { .. }) {
                continue;
            }
            changed |= if op.is_phi() {
                Self::expand_phi(func, id, ctx)?
            } else {
                Self::expand_operands(func, id, ctx)?
            };
        }
        if changed {
            log::debug!("{}: constant expressions expanded", func.name());
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        ir::{AddressSpace, BinaryOp, CastOp, Param, Type},
        test::create_module,
    };

    fn global_as_int() -> Constant {
        Constant::Expr(Box::new(ConstExpr::Cast {
            op: CastOp::PtrToInt,
            value: Constant::Global {
                name: "table".into(),
                space: AddressSpace::Global,
            },
            ty: Type::I64,
        }))
    }

    fn run(func: &mut Function) -> bool {
        let info = ModuleInfo::of(&create_module(200, vec![]));
        let ctx = PassContext::new(PipelineConfig::default());
        ConstantExpansionPass::new()
            .run_on_function(func, &info, &ctx)
            .unwrap()
    }

    #[test]
    fn test_operand_expanded_before_user() {
        let mut func = Function::new("f", vec![Param::new("i", Type::I64)], Type::I64);
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let expr = b.constant(global_as_int());
        let sum = b.binary(BinaryOp::Add, expr, Value::Arg(0));
        b.ret(Some(sum));

        assert!(run(&mut func));
        let insts = func.block_insts(entry).to_vec();
        assert_eq!(insts.len(), 3);
        assert!(matches!(
            func.inst(insts[0]).op,
            Op::Cast {
                op: CastOp::PtrToInt,
                ..
            }
        ));
        assert_eq!(
            func.inst(insts[1]).op.operands(),
            vec![Value::Inst(insts[0]), Value::Arg(0)]
        );
        assert!(!run(&mut func));
    }

    #[test]
    fn test_phi_operand_expanded_in_predecessor() {
        let mut func = Function::new("f", vec![Param::new("c", Type::BOOL)], Type::I64);
        let entry = func.add_block("entry");
        let other = func.add_block("other");
        let join = func.add_block("join");
        let mut b = func.build_at_end(entry);
        let expr = b.constant(global_as_int());
        let zero = b.const_int(64, 0);
        b.cond_br(Value::Arg(0), join, other);
        func.build_at_end(other).br(join);
        let mut b = func.build_at_end(join);
        let phi = b.phi(Type::I64, vec![(expr, entry), (zero, other), (expr, entry)]);
        b.ret(Some(phi));

        assert!(run(&mut func));
        let entry_insts = func.block_insts(entry).to_vec();
        assert_eq!(entry_insts.len(), 2);
        let expanded = Value::Inst(entry_insts[0]);
        let Op::Phi { incoming } = &func.inst(phi.as_inst().unwrap()).op else {
            panic!("phi expected");
        };
        assert_eq!(incoming[0].0, expanded);
        assert_eq!(incoming[2].0, expanded);
        assert_eq!(incoming[1].0, zero);
    }

    #[test]
    fn test_vector_with_expression_rebuilt() {
        let mut func = Function::new("f", vec![], Type::vector(Type::I64, 2));
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let vector = b.constant(Constant::Vector(vec![global_as_int(), Constant::int(64, 7)]));
        b.ret(Some(vector));

        assert!(run(&mut func));
        let insts = func.block_insts(entry).to_vec();
        // ptrtoint, two insertelements, ret
        assert_eq!(insts.len(), 4);
        assert!(matches!(func.inst(insts[1]).op, Op::InsertElement { .. }));
        assert_eq!(func.inst(insts[2]).ty, Type::vector(Type::I64, 2));
        assert!(func.live_insts().iter().all(|id| func
            .inst(*id)
            .op
            .operands()
            .iter()
            .all(|v| !func.as_constant(*v).is_some_and(Constant::contains_expr))));
    }

    #[test]
    fn test_landing_pad_untouched() {
        let mut func = Function::new("f", vec![], Type::Void);
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let expr = b.constant(global_as_int());
        b.inst(Op::LandingPad { clauses: vec![expr] }, Type::Void);
        b.ret(None);
        assert!(!run(&mut func));
    }
}
