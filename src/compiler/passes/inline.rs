//! Always-inline expansion.
//!
//! The backend compiles each kernel as a single function, so every device function marked
//! always-inline is expanded into its callers before the lowering passes run.
//!
//! # Algorithm
//!
//! Callers are visited in call-graph postorder, so a callee has usually been flattened
//! before it is copied into its own callers. For each call site:
//!
//! 1. The calling block is split after the call; the tail keeps the original terminator.
//! 2. The callee's blocks, constants and instructions are copied into the caller with
//!    arguments bound to the call operands.
//! 3. Every `ret` becomes a branch to the tail. Return values merge in a phi at the top of
//!    the tail (or replace the call directly when there is one return).
//! 4. Fixed-size allocas of the callee's entry block move to the caller's entry block.
//!
//! Afterwards, always-inline functions that are no longer referenced are deleted.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    compiler::{EventKind, ModulePass, PassContext},
    ir::{BlockId, Callee, FnAttributes, Function, InstId, Module, Op, Type, Value},
    Result,
};

/// Upper bound of call sites expanded into one function.
const MAX_INLINES_PER_FUNCTION: usize = 4096;

/// Inlines calls to always-inline functions.
pub struct AlwaysInlinerPass;

impl Default for AlwaysInlinerPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AlwaysInlinerPass {
    /// Creates a new inliner pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_inlinable(func: &Function) -> bool {
        !func.is_declaration()
            && !func.is_variadic()
            && func.attrs.contains(FnAttributes::ALWAYS_INLINE)
            && !func.attrs.contains(FnAttributes::NO_DUPLICATE)
    }

    /// Function names in call-graph postorder (callees before callers).
    fn postorder(module: &Module) -> Vec<String> {
        fn visit(
            module: &Module,
            name: &str,
            seen: &mut FxHashSet<String>,
            order: &mut Vec<String>,
        ) {
            if !seen.insert(name.to_string()) {
                return;
            }
            if let Some(func) = module.function(name) {
                for callee in func.referenced_functions() {
                    visit(module, &callee, seen, order);
                }
                order.push(name.to_string());
            }
        }

        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        for func in &module.functions {
            visit(module, func.name(), &mut seen, &mut order);
        }
        order
    }

    /// Finds the first call in `caller` to an inlinable function other than itself.
    fn next_call_site(caller: &Function, module: &Module) -> Option<(InstId, String)> {
        caller.live_insts().into_iter().find_map(|id| {
            let Op::Call {
                callee: Callee::Direct(name),
                ..
            } = &caller.inst(id).op
            else {
                return None;
            };
            if name == caller.name() {
                return None;
            }
            module
                .function(name)
                .filter(|f| Self::is_inlinable(f))
                .map(|_| (id, name.clone()))
        })
    }

    /// Copies `callee` into `caller` in place of the call `call`.
    fn inline_call(caller: &mut Function, call: InstId, callee: &Function) -> Result<()> {
        let Some((call_block, index)) = caller.position(call) else {
            return Err(malformed_error!("call {} is not linked", call));
        };
        let Op::Call { args, .. } = caller.inst(call).op.clone() else {
            return Err(malformed_error!("{} is not a call", call));
        };
        let ret_ty = caller.inst(call).ty.clone();
        let tail = caller.split_block(call_block, index + 1, format!("{}.cont", callee.name()));

        let mut blocks: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        for block in callee.block_ids() {
            let name = format!("{}.{}", callee.name(), callee.block(block).name);
            blocks.insert(block, caller.add_block(name));
        }

        let mut values: FxHashMap<Value, Value> = FxHashMap::default();
        for (i, arg) in args.iter().enumerate() {
            values.insert(Value::Arg(i as u32), *arg);
        }

        // Copy instructions first, remap operands once every definition has a new id.
        let mut copied = Vec::new();
        let mut returns = Vec::new();
        for block in callee.block_ids() {
            let target = blocks[&block];
            for id in callee.block_insts(block) {
                let inst = callee.inst(*id);
                let new_id = caller.append_inst(target, inst.op.clone(), inst.ty.clone());
                caller.inst_mut(new_id).name.clone_from(&inst.name);
                values.insert(Value::Inst(*id), Value::Inst(new_id));
                copied.push(new_id);
            }
        }

        for new_id in &copied {
            let mut op = caller.inst(*new_id).op.clone();
            let mut constants = Vec::new();
            op.visit_operands(|v| {
                if let Some(c) = callee.as_constant(v) {
                    constants.push((v, c.clone()));
                }
            });
            for (old, constant) in constants {
                if !values.contains_key(&old) {
                    let pooled = caller.constant(constant);
                    values.insert(old, pooled);
                }
            }
            op.visit_operands_mut(|v| {
                if let Some(mapped) = values.get(v) {
                    *v = *mapped;
                }
            });
            remap_blocks(&mut op, &blocks);
            if let Op::Ret { value } = op {
                let block = caller.inst(*new_id).block().unwrap_or(tail);
                returns.push((value, block));
                op = Op::Br { target: tail };
            }
            caller.inst_mut(*new_id).op = op;
        }

        // Replace the call with a branch into the copied entry block.
        caller.remove(call);
        caller.append_inst(
            call_block,
            Op::Br {
                target: blocks[&callee.entry()],
            },
            Type::Void,
        );

        if ret_ty != Type::Void {
            let result = match returns.as_slice() {
                [(Some(value), _)] => *value,
                _ => {
                    let incoming = returns
                        .iter()
                        .filter_map(|(value, block)| value.map(|v| (v, *block)))
                        .collect();
                    Value::Inst(caller.insert_inst(tail, 0, Op::Phi { incoming }, ret_ty))
                }
            };
            caller.replace_all_uses(Value::Inst(call), result);
        }

        let entry = caller.entry();
        for id in caller.block_insts(blocks[&callee.entry()]).to_vec() {
            if matches!(caller.inst(id).op, Op::Alloca { count: None, .. }) {
                caller.move_inst(id, entry, 0);
            }
        }

        for (header, hint) in &callee.loop_hints {
            if let Some(mapped) = blocks.get(header) {
                caller.loop_hints.insert(*mapped, *hint);
            }
        }
        Ok(())
    }

    fn inline_into(
        &self,
        module: &mut Module,
        caller_name: &str,
        ctx: &PassContext,
    ) -> Result<bool> {
        let mut inlined = 0;
        loop {
            let Some(caller) = module.function(caller_name) else {
                return Ok(inlined > 0);
            };
            let Some((call, callee_name)) = Self::next_call_site(caller, module) else {
                break;
            };
            if inlined == MAX_INLINES_PER_FUNCTION {
                return Err(unsupported!(
                    caller,
                    "always-inline expansion does not terminate (recursive call of @{})",
                    callee_name
                ));
            }
            let Some(callee) = module.function(&callee_name).cloned() else {
                break;
            };
            let Some(caller) = module.function_mut(caller_name) else {
                break;
            };
            Self::inline_call(caller, call, &callee)?;
            log::trace!("@{callee_name} inlined into @{caller_name}");
            ctx.events
                .record(EventKind::FunctionInlined)
                .function(caller_name)
                .pass(self.name())
                .message(format!("inlined @{callee_name}"));
            inlined += 1;
        }
        if inlined > 0 {
            log::debug!("@{caller_name}: {inlined} call sites inlined");
        }
        Ok(inlined > 0)
    }

    fn remove_dead(&self, module: &mut Module, ctx: &PassContext) -> bool {
        let mut changed = false;
        loop {
            let dead: Vec<String> = module
                .functions
                .iter()
                .filter(|f| {
                    Self::is_inlinable(f)
                        && !module.is_kernel(f)
                        && !module.block_functions.iter().any(|b| b == f.name())
                        && !module.is_function_referenced(f.name())
                })
                .map(|f| f.name().to_string())
                .collect();
            if dead.is_empty() {
                return changed;
            }
            for name in dead {
                module.remove_function(&name);
                ctx.events
                    .record(EventKind::FunctionRemoved)
                    .function(name.as_str())
                    .pass(self.name())
                    .message("unreferenced after inlining");
            }
            changed = true;
        }
    }
}

fn remap_blocks(op: &mut Op, blocks: &FxHashMap<BlockId, BlockId>) {
    let map = |b: &mut BlockId| {
        if let Some(mapped) = blocks.get(b) {
            *b = *mapped;
        }
    };
    match op {
        Op::Br { target } => map(target),
        Op::CondBr {
            on_true, on_false, ..
        } => {
            map(on_true);
            map(on_false);
        }
        Op::Phi { incoming } => incoming.iter_mut().for_each(|(_, b)| map(b)),
        _ => {}
    }
}

impl ModulePass for AlwaysInlinerPass {
    fn name(&self) -> &'static str {
        "always-inline"
    }

    fn description(&self) -> &'static str {
        "Inlines calls to always-inline device functions"
    }

    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        let mut changed = false;
        for name in Self::postorder(module) {
            if module.function(&name).is_some_and(Function::is_declaration) {
                continue;
            }
            changed |= self.inline_into(module, &name, ctx)?;
        }
        changed |= self.remove_dead(module, ctx);
        Ok(changed)
    }
}
