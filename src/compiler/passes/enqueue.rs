//! Device-side enqueue lowering.
//!
//! Blocks passed to `enqueue_kernel` reach the backend as a block literal: a struct whose
//! fourth field holds the address of an `_invoke` function. The backend cannot call through
//! function pointers, so this pass
//!
//! 1. binds every block literal to its invoke function and replaces the function address
//!    with an index into the module's ordered block-function list,
//! 2. turns indirect calls through a literal's invoke field into direct calls,
//! 3. clones every enqueued invoke function into a kernel whose pointer arguments live in
//!    global memory, and rewrites variadic enqueue calls (local memory sizes) to
//!    `__gen_enqueue_kernel_slm`, which takes the sizes as an explicit array.
//!
//! Bindings are kept for the whole module run. A call site that does not resolve through
//! them is rejected with [`crate::Error::MalformedPattern`].

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    compiler::{EventKind, ModulePass, PassContext},
    ir::{
        AddressSpace, BinaryOp, Callee, CastOp, ConstExpr, Constant, FnAttributes, Function, GlobalVariable,
        InstBuilder, InstId, KernelArgInfo, Linkage, Module, Op, Param, Type, Value,
    },
    Error, Result,
};

const INVOKE_MARKER: &str = "_invoke";
const ENQUEUE_MARKER: &str = "enqueue_kernel";
const ENQUEUE_SLM: &str = "__gen_enqueue_kernel_slm";
const LITERAL_INVOKE_FIELD: usize = 3;
const BLOCK_ARG: usize = 3;
const BLOCK_ARG_AFTER_EVENTS: usize = 6;

/// Where a block literal lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Literal {
    /// A function-local value (usually an alloca).
    Local { function: String, value: Value },
    /// A module global with a constant initializer.
    Global(String),
}

/// Literal to invoke function map plus the ordered dispatch list.
#[derive(Debug, Default)]
struct BlockBindings {
    bound: FxHashMap<Literal, String>,
    functions: Vec<String>,
}

impl BlockBindings {
    fn new(functions: Vec<String>) -> Self {
        Self {
            bound: FxHashMap::default(),
            functions,
        }
    }

    fn dispatch_index(&mut self, name: &str) -> u64 {
        let index = match self.functions.iter().position(|f| f == name) {
            Some(index) => index,
            None => {
                self.functions.push(name.to_string());
                self.functions.len() - 1
            }
        };
        index as u64
    }

    fn bind(&mut self, literal: Literal, invoke: String, ctx: &PassContext, function: &str) {
        log::trace!("{function}: {literal:?} bound to @{invoke}");
        ctx.events
            .record(EventKind::BlockBound)
            .function(function)
            .pass("device-enqueue")
            .message(format!("block literal bound to {invoke}"));
        self.bound.insert(literal, invoke);
    }

    fn get(&self, literal: &Literal) -> Option<&String> {
        self.bound.get(literal)
    }
}

/// Name of the invoke function a constant refers to, looking through constant casts.
fn invoke_name(constant: &Constant) -> Option<&str> {
    match strip_const_casts(constant) {
        Constant::Function { name, .. } if name.contains(INVOKE_MARKER) => Some(name),
        _ => None,
    }
}

fn strip_const_casts(mut constant: &Constant) -> &Constant {
    while let Constant::Expr(expr) = constant {
        match expr.as_ref() {
            ConstExpr::Cast { value, .. } => constant = value,
            _ => break,
        }
    }
    constant
}

fn malformed(function: &str, message: String) -> Error {
    Error::MalformedPattern {
        function: function.to_string(),
        message,
    }
}

/// Per-function view of the module run.
struct Lowering<'a> {
    func: &'a mut Function,
    globals: &'a [GlobalVariable],
    bindings: &'a mut BlockBindings,
    ctx: &'a PassContext,
    pointer_bits: u32,
}

impl Lowering<'_> {
    fn invoke_target(&self, value: Value) -> Option<String> {
        let value = self.func.strip_casts(value);
        self.func
            .as_constant(value)
            .and_then(invoke_name)
            .map(str::to_string)
    }

    fn local(&self, value: Value) -> Literal {
        Literal::Local {
            function: self.func.name().to_string(),
            value,
        }
    }

    /// Invoke function bound to `value`, without looking through memory.
    fn bound(&self, value: Value) -> Option<String> {
        if let Some(name) = self.bindings.get(&self.local(value)) {
            return Some(name.clone());
        }
        match self.func.as_constant(value).map(strip_const_casts) {
            Some(Constant::Global { name, .. }) => {
                self.bindings.get(&Literal::Global(name.clone())).cloned()
            }
            _ => None,
        }
    }

    /// Resolves a block literal reference to its invoke function.
    ///
    /// Accepted shapes (casts stripped): a bound value, a global literal, a load of a global
    /// whose initializer points at a global literal, and a load of an alloca that was stored
    /// with a bound value.
    fn resolve_literal(&self, value: Value) -> Option<String> {
        let value = self.func.strip_casts(value);
        if let Some(name) = self.bound(value) {
            return Some(name);
        }
        let Some(Op::Load { ptr, .. }) = self.func.def_op(value) else {
            return None;
        };
        let slot = self.func.strip_casts(*ptr);

        if let Some(Constant::Global { name, .. }) = self.func.as_constant(slot) {
            let init = self
                .globals
                .iter()
                .find(|g| g.name == *name)?
                .initializer
                .as_ref()?;
            return match strip_const_casts(init) {
                Constant::Global { name: literal, .. } => {
                    self.bindings.get(&Literal::Global(literal.clone())).cloned()
                }
                _ => None,
            };
        }

        if matches!(self.func.def_op(slot), Some(Op::Alloca { .. })) {
            let stored = self
                .func
                .users(slot)
                .into_iter()
                .filter_map(|user| match &self.func.inst(user).op {
                    Op::Store { value, ptr, .. } if self.func.strip_casts(*ptr) == slot => {
                        Some(*value)
                    }
                    _ => None,
                })
                .last()?;
            return self.bound(self.func.strip_casts(stored));
        }
        None
    }

    /// Base pointer of an address computation, either a GEP or its lowered integer form
    /// `inttoptr(add(... add(ptrtoint(base), ..) ..))`.
    fn address_base(&self, ptr: Value) -> Option<Value> {
        match self.func.def_op(self.func.strip_casts(ptr))? {
            Op::Gep { base, .. } => Some(self.func.strip_casts(*base)),
            Op::Cast {
                op: CastOp::IntToPtr,
                value,
                ..
            } => {
                let mut address = *value;
                loop {
                    match self.func.def_op(address)? {
                        Op::Binary {
                            op: BinaryOp::Add,
                            lhs,
                            ..
                        } => address = *lhs,
                        Op::Cast {
                            op: CastOp::PtrToInt,
                            value,
                            ..
                        } => return Some(self.func.strip_casts(*value)),
                        _ => return None,
                    }
                }
            }
            _ => None,
        }
    }

    /// Records literals whose invoke field is written with an invoke function address.
    fn bind_stores(&mut self) -> bool {
        let mut found = Vec::new();
        for id in self.func.live_insts() {
            let Op::Store { value, ptr, .. } = &self.func.inst(id).op else {
                continue;
            };
            let Some(invoke) = self.invoke_target(*value) else {
                continue;
            };
            if let Some(base) = self.address_base(*ptr) {
                found.push((base, invoke));
            }
        }
        let changed = !found.is_empty();
        let function = self.func.name().to_string();
        for (value, invoke) in found {
            let literal = self.local(value);
            self.bindings.bind(literal, invoke, self.ctx, &function);
        }
        changed
    }

    /// Replaces invoke function addresses with their dispatch index.
    fn replace_addresses(&mut self) -> bool {
        let casts: Vec<(InstId, String)> = self
            .func
            .live_insts()
            .into_iter()
            .filter(|id| matches!(self.func.inst(*id).op, Op::Cast { .. }))
            .filter_map(|id| self.invoke_target(Value::Inst(id)).map(|name| (id, name)))
            .collect();
        for (id, name) in &casts {
            let index = self.bindings.dispatch_index(name);
            let index = self.func.constant(Constant::int(self.pointer_bits, index));
            self.func.replace_all_uses(Value::Inst(*id), index);
            self.func.remove(*id);
        }

        let mut direct: FxHashMap<Value, String> = FxHashMap::default();
        for id in self.func.live_insts() {
            self.func.inst(id).op.visit_operands(|operand| {
                if let Some(name) = self.func.as_constant(operand).and_then(invoke_name) {
                    direct.insert(operand, name.to_string());
                }
            });
        }
        let mut replacements: FxHashMap<Value, Value> = FxHashMap::default();
        for (operand, name) in &direct {
            let index = self.bindings.dispatch_index(name);
            replacements.insert(
                *operand,
                self.func.constant(Constant::int(self.pointer_bits, index)),
            );
        }
        for (from, to) in &replacements {
            self.func.replace_all_uses(*from, *to);
        }
        !casts.is_empty() || !replacements.is_empty()
    }

    /// `callee = load(gep(literal, ...))` becomes a direct call of the literal's invoke function.
    fn resolve_indirect_calls(&mut self) -> Result<bool> {
        let calls: Vec<(InstId, Value)> = self
            .func
            .live_insts()
            .into_iter()
            .filter_map(|id| match &self.func.inst(id).op {
                Op::Call {
                    callee: Callee::Indirect(target),
                    ..
                } => Some((id, *target)),
                _ => None,
            })
            .collect();

        for (id, target) in &calls {
            let invoke = self
                .indirect_target(*target)
                .ok_or_else(|| {
                    malformed(self.func.name(), format!("indirect call {id} has no block literal"))
                })?;
            if let Op::Call { callee, .. } = &mut self.func.inst_mut(*id).op {
                *callee = Callee::Direct(invoke.clone());
            }
            log::trace!("{}: call {id} resolved to @{invoke}", self.func.name());
            self.ctx
                .events
                .record(EventKind::CallResolved)
                .function(self.func.name())
                .pass("device-enqueue")
                .message(format!("indirect call resolved to {invoke}"));
        }
        Ok(!calls.is_empty())
    }

    fn indirect_target(&self, target: Value) -> Option<String> {
        let target = self.func.strip_casts(target);
        let Some(Op::Load { ptr, .. }) = self.func.def_op(target) else {
            return None;
        };
        self.resolve_literal(self.address_base(*ptr)?)
    }

    /// Resolves the block of every enqueue call; returns the enqueued invoke functions and the
    /// argument types of any `__gen_enqueue_kernel_slm` call that was created.
    fn rewrite_enqueues(
        &mut self,
        variadic: &FxHashMap<String, bool>,
    ) -> Result<(Vec<String>, Option<Vec<Type>>)> {
        let calls: Vec<(InstId, String, Vec<Value>)> = self
            .func
            .live_insts()
            .into_iter()
            .filter_map(|id| match &self.func.inst(id).op {
                Op::Call {
                    callee: Callee::Direct(name),
                    args,
                    ..
                } if name.contains(ENQUEUE_MARKER) && name != ENQUEUE_SLM => {
                    Some((id, name.clone(), args.clone()))
                }
                _ => None,
            })
            .collect();

        let mut enqueued = Vec::new();
        let mut slm = None;
        for (id, callee, args) in calls {
            // The event-waiting overloads take three more arguments before the block.
            let block_index = match args.get(BLOCK_ARG) {
                Some(arg) if self.func.value_type(*arg).int_bits().is_some() => {
                    BLOCK_ARG_AFTER_EVENTS
                }
                _ => BLOCK_ARG,
            };
            let Some(&block) = args.get(block_index) else {
                return Err(malformed(
                    self.func.name(),
                    format!("{callee} call {id} has no block argument"),
                ));
            };
            let invoke = self.resolve_literal(block).ok_or_else(|| {
                malformed(
                    self.func.name(),
                    format!("block of {callee} call {id} is not a literal"),
                )
            })?;
            enqueued.push(invoke);

            let is_variadic = variadic
                .get(&callee)
                .copied()
                .unwrap_or(args.len() > block_index + 1);
            if is_variadic {
                slm = Some(self.rewrite_slm(id, &args, block_index)?);
            }
        }
        Ok((enqueued, slm))
    }

    fn rewrite_slm(&mut self, id: InstId, args: &[Value], block_index: usize) -> Result<Vec<Type>> {
        let sizes = &args[block_index + 1..];
        let count = sizes.len() as u64;
        let array = Type::array(Type::I32, count);
        let entry = self.func.entry();
        let slots = InstBuilder::at(self.func, entry, 0).alloca(array.clone(), None);

        // Address lowering already ran; slots are addressed with plain integer arithmetic.
        let bits = self.pointer_bits;
        let mut b = self.func.build_before(id)?;
        let base = b.cast(CastOp::PtrToInt, slots, Type::Int(bits));
        for (i, size) in sizes.iter().enumerate() {
            let slot = if i == 0 {
                base
            } else {
                let offset = b.const_int(bits, 4 * i as u64);
                b.binary(BinaryOp::Add, base, offset)
            };
            let slot = b.cast(CastOp::IntToPtr, slot, Type::Ptr(AddressSpace::Private));
            b.store(*size, slot);
        }
        let mut rewritten: Vec<Value> = args[..3].to_vec();
        rewritten.push(args[block_index]);
        rewritten.push(b.const_int(32, count));
        rewritten.push(slots);
        let call = b.call(ENQUEUE_SLM, rewritten.clone(), Type::I32);

        self.func.replace_all_uses(Value::Inst(id), call);
        self.func.remove(id);
        self.ctx
            .events
            .record(EventKind::EnqueueRewritten)
            .function(self.func.name())
            .pass("device-enqueue")
            .message(format!("{count} local memory sizes passed to {ENQUEUE_SLM}"));
        Ok(rewritten.iter().map(|a| self.func.value_type(*a)).collect())
    }
}

/// Changes the type of every pointer derived from `root` to a global pointer.
///
/// Integer address arithmetic (`ptrtoint`, `add`, ...) is followed without being retyped so
/// pointers rebuilt from lowered addresses are reached too. Loads and stores end the walk:
/// their results are new values, not aliases of `root`.
fn retarget_to_global(func: &mut Function, root: Value) {
    let global = Type::Ptr(AddressSpace::Global);
    let mut seen: FxHashSet<Value> = FxHashSet::default();
    let mut work = vec![root];
    while let Some(value) = work.pop() {
        for user in func.users(value) {
            let inst = func.inst(user);
            if matches!(inst.op, Op::Load { .. } | Op::Store { .. } | Op::Call { .. }) {
                continue;
            }
            if !seen.insert(Value::Inst(user)) {
                continue;
            }
            if inst.ty.is_ptr() {
                if inst.ty != global {
                    func.inst_mut(user).ty = global.clone();
                }
                work.push(Value::Inst(user));
            } else if matches!(inst.op, Op::Cast { op: CastOp::PtrToInt, .. } | Op::Binary { .. }) {
                work.push(Value::Inst(user));
            }
        }
    }
}

/// Lowers block literals and enqueue calls on 2.0 modules.
pub struct DeviceEnqueuePass;

impl Default for DeviceEnqueuePass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEnqueuePass {
    /// Creates a new device enqueue pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn bind_global_literals(
        &self,
        module: &mut Module,
        bindings: &mut BlockBindings,
        ctx: &PassContext,
    ) -> bool {
        let bits = module.pointer_bits();
        let mut changed = false;
        for global in &mut module.globals {
            let Some(Constant::Aggregate { fields, .. }) = &mut global.initializer else {
                continue;
            };
            let Some(invoke) = fields
                .get(LITERAL_INVOKE_FIELD)
                .and_then(invoke_name)
                .map(str::to_string)
            else {
                continue;
            };
            let index = bindings.dispatch_index(&invoke);
            fields[LITERAL_INVOKE_FIELD] = Constant::int(bits, index);
            bindings.bind(Literal::Global(global.name.clone()), invoke, ctx, &global.name);
            changed = true;
        }
        changed
    }

    /// Binds, resolves and rewrites inside every function body.
    #[allow(clippy::type_complexity)]
    fn lower_functions(
        &self,
        module: &mut Module,
        bindings: &mut BlockBindings,
        ctx: &PassContext,
    ) -> Result<(bool, Vec<String>, Option<Vec<Type>>)> {
        let pointer_bits = module.pointer_bits();
        let variadic: FxHashMap<String, bool> = module
            .functions
            .iter()
            .map(|f| (f.name().to_string(), f.is_variadic()))
            .collect();
        let mut changed = false;
        let mut enqueued = Vec::new();
        let mut slm_signature = None;

        let Module {
            functions, globals, ..
        } = module;
        for func in functions.iter_mut().filter(|f| !f.is_declaration()) {
            let mut lowering = Lowering {
                func,
                globals: globals.as_slice(),
                bindings: &mut *bindings,
                ctx,
                pointer_bits,
            };
            changed |= lowering.bind_stores();
            changed |= lowering.replace_addresses();
            changed |= lowering.resolve_indirect_calls()?;
            let (kernels, slm) = lowering.rewrite_enqueues(&variadic)?;
            changed |= !kernels.is_empty();
            enqueued.extend(kernels);
            if slm.is_some() {
                slm_signature = slm;
            }
        }
        Ok((changed, enqueued, slm_signature))
    }

    /// Clones `name` as a kernel taking global pointers; the original becomes `__d<name>`.
    fn make_kernel(&self, module: &mut Module, name: &str, ctx: &PassContext) -> Result<()> {
        let device = module
            .function(name)
            .filter(|f| !f.is_declaration())
            .ok_or_else(|| Error::MissingSymbol(name.to_string()))?;
        let mut kernel = device.clone();

        for param in kernel.params_mut() {
            if param.ty == Type::Ptr(AddressSpace::Private) {
                param.ty = Type::Ptr(AddressSpace::Global);
            }
        }
        let global_params: Vec<u32> = (0..kernel.params().len() as u32)
            .filter(|i| kernel.params()[*i as usize].ty == Type::Ptr(AddressSpace::Global))
            .collect();
        for index in global_params {
            retarget_to_global(&mut kernel, Value::Arg(index));
        }

        let params = kernel.params();
        let count = params.len();
        let metadata = KernelArgInfo {
            address_spaces: params
                .iter()
                .map(|p| p.ty.address_space().map_or(0, AddressSpace::number))
                .collect(),
            access_quals: vec!["none".to_string(); count],
            type_names: vec!["char*".to_string(); count],
            base_type_names: vec!["char*".to_string(); count],
            type_quals: vec![String::new(); count],
            names: params.iter().map(|p| p.name.clone()).collect(),
        };
        kernel.kernel_args = Some(metadata);
        kernel.linkage = Linkage::External;
        kernel.attrs.remove(FnAttributes::ALWAYS_INLINE);

        let renamed = format!("__d{name}");
        if let Some(device) = module.function_mut(name) {
            device.set_name(renamed.clone());
        }
        for func in &mut module.functions {
            for id in func.live_insts() {
                if let Op::Call {
                    callee: Callee::Direct(callee),
                    ..
                } = &mut func.inst_mut(id).op
                {
                    if callee == name {
                        *callee = renamed.clone();
                    }
                }
            }
        }
        module.functions.push(kernel);
        if !module.is_function_referenced(&renamed) {
            module.remove_function(&renamed);
        }

        log::debug!("@{name}: cloned as enqueued kernel");
        ctx.events
            .record(EventKind::KernelCloned)
            .function(name)
            .pass(self.name())
            .message(format!("{count} arguments, original kept as {renamed}"));
        Ok(())
    }
}

impl ModulePass for DeviceEnqueuePass {
    fn name(&self) -> &'static str {
        "device-enqueue"
    }

    fn description(&self) -> &'static str {
        "Resolves block literals and rewrites enqueue_kernel calls"
    }

    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        if !module.is_ocl20() {
            return Ok(false);
        }
        let mut bindings = BlockBindings::new(std::mem::take(&mut module.block_functions));
        let mut changed = self.bind_global_literals(module, &mut bindings, ctx);

        let outcome = self.lower_functions(module, &mut bindings, ctx);
        module.block_functions = bindings.functions;
        let (lowered, enqueued, slm_signature) = outcome?;
        changed |= lowered;

        let mut cloned = FxHashSet::default();
        for name in enqueued {
            if cloned.insert(name.clone()) {
                self.make_kernel(module, &name, ctx)?;
            }
        }
        if let Some(types) = slm_signature {
            let params = types
                .into_iter()
                .enumerate()
                .map(|(i, ty)| Param::new(format!("arg{i}"), ty))
                .collect();
            module.declare(Function::new(ENQUEUE_SLM, params, Type::I32));
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        test::{create_kernel, create_module, global_ptr},
    };

    const INVOKE: &str = "__parent_block_invoke";

    fn literal_type() -> Type {
        Type::Struct(vec![
            Type::I32,
            Type::I32,
            Type::I32,
            Type::Ptr(AddressSpace::Private),
        ])
    }

    /// Block invoke function writing through a pointer derived from its argument.
    fn invoke_function() -> Function {
        let mut func = Function::new(
            INVOKE,
            vec![Param::new("block", Type::Ptr(AddressSpace::Private))],
            Type::Void,
        );
        let entry = func.add_block("entry");
        let mut b = func.build_at_end(entry);
        let four = b.const_int(32, 4);
        let field = b.gep(Type::I8, Value::Arg(0), vec![four]);
        let one = b.const_int(32, 1);
        b.store(one, field);
        b.ret(None);
        func
    }

    /// Kernel building a local block literal; `tail` emits the calls that use it.
    fn parent(tail: impl FnOnce(&mut InstBuilder<'_>, Value)) -> Function {
        let mut kernel = create_kernel("parent", vec![global_ptr("out")]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let literal = b.alloca(literal_type(), None);
        let zero = b.const_int(32, 0);
        let three = b.const_int(32, 3);
        let field = b.gep(literal_type(), literal, vec![zero, three]);
        let address = b.constant(Constant::Function {
            name: INVOKE.to_string(),
            space: AddressSpace::Private,
        });
        b.store(address, field);
        tail(&mut b, literal);
        b.ret(None);
        kernel
    }

    fn run(module: &mut Module) -> (Result<bool>, PassContext) {
        let ctx = PassContext::new(PipelineConfig::default());
        let result = DeviceEnqueuePass::new().run_on_module(module, &ctx);
        (result, ctx)
    }

    fn direct_callees(func: &Function) -> Vec<String> {
        func.live_insts()
            .into_iter()
            .filter_map(|id| match &func.inst(id).op {
                Op::Call {
                    callee: Callee::Direct(name),
                    ..
                } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn enqueue(b: &mut InstBuilder<'_>, literal: Value, extra: &[Value]) {
        let queue = b.const_int(32, 0);
        let flags = b.const_int(32, 0);
        let range = b.const_int(32, 64);
        let mut args = vec![queue, flags, range, literal];
        args.extend_from_slice(extra);
        b.call("enqueue_kernel", args, Type::I32);
    }

    #[test]
    fn test_inactive_before_ocl20() {
        let mut module = create_module(120, vec![invoke_function(), parent(|_, _| {})]);
        let before = module.clone();
        assert!(!run(&mut module).0.unwrap());
        assert_eq!(module, before);
    }

    #[test]
    fn test_indirect_call_through_local_literal() {
        let kernel = parent(|b, literal| {
            let zero = b.const_int(32, 0);
            let three = b.const_int(32, 3);
            let field = b.gep(literal_type(), literal, vec![zero, three]);
            let callee = b.load(Type::Ptr(AddressSpace::Private), field);
            b.call_indirect(callee, vec![literal], Type::Void);
        });
        let mut module = create_module(200, vec![invoke_function(), kernel]);
        let (result, ctx) = run(&mut module);
        assert!(result.unwrap());

        let kernel = module.function("parent").unwrap();
        assert_eq!(direct_callees(kernel), vec![INVOKE.to_string()]);
        assert_eq!(module.block_functions, vec![INVOKE.to_string()]);
        // the stored invoke address is now dispatch index 0
        let stored: Vec<_> = kernel
            .live_insts()
            .into_iter()
            .filter_map(|id| match &kernel.inst(id).op {
                Op::Store { value, .. } => kernel.const_int(*value),
                _ => None,
            })
            .collect();
        assert_eq!(stored, vec![0]);
        assert_eq!(ctx.events.count_kind(EventKind::BlockBound), 1);
        assert_eq!(ctx.events.count_kind(EventKind::CallResolved), 1);
    }

    #[test]
    fn test_enqueue_clones_invoke_as_kernel() {
        let kernel = parent(|b, literal| enqueue(b, literal, &[]));
        let mut module = create_module(200, vec![invoke_function(), kernel]);
        let (result, ctx) = run(&mut module);
        assert!(result.unwrap());

        let clone = module.function(INVOKE).unwrap();
        assert!(module.is_kernel(clone));
        assert_eq!(clone.params()[0].ty, Type::Ptr(AddressSpace::Global));
        let derived: Vec<_> = clone
            .live_insts()
            .into_iter()
            .filter(|id| matches!(clone.inst(*id).op, Op::Gep { .. }))
            .map(|id| clone.inst(id).ty.clone())
            .collect();
        assert_eq!(derived, vec![Type::Ptr(AddressSpace::Global)]);

        let args = clone.kernel_args.as_ref().unwrap();
        assert_eq!(args.address_spaces, vec![1]);
        assert_eq!(args.access_quals, vec!["none".to_string()]);
        assert_eq!(args.type_names, vec!["char*".to_string()]);
        assert_eq!(args.base_type_names, vec!["char*".to_string()]);
        assert_eq!(args.type_quals, vec![String::new()]);
        assert_eq!(args.names, vec!["block".to_string()]);

        // the private-pointer original has no callers left
        assert!(module.function(&format!("__d{INVOKE}")).is_none());
        assert_eq!(module.block_functions, vec![INVOKE.to_string()]);
        assert_eq!(ctx.events.count_kind(EventKind::KernelCloned), 1);
        assert_eq!(ctx.events.count_kind(EventKind::EnqueueRewritten), 0);
    }

    #[test]
    fn test_variadic_enqueue_passes_size_array() {
        let kernel = parent(|b, literal| {
            let sixteen = b.const_int(32, 16);
            let thirty_two = b.const_int(32, 32);
            enqueue(b, literal, &[sixteen, thirty_two]);
        });
        let declaration = Function::new_variadic(
            "enqueue_kernel",
            vec![
                Param::new("queue", Type::I32),
                Param::new("flags", Type::I32),
                Param::new("range", Type::I32),
                Param::new("block", Type::Ptr(AddressSpace::Private)),
            ],
            Type::I32,
        );
        let mut module = create_module(200, vec![invoke_function(), declaration, kernel]);
        let (result, ctx) = run(&mut module);
        assert!(result.unwrap());

        let kernel = module.function("parent").unwrap();
        assert_eq!(direct_callees(kernel), vec![ENQUEUE_SLM.to_string()]);
        let (args, first) = kernel
            .live_insts()
            .into_iter()
            .find_map(|id| match &kernel.inst(id).op {
                Op::Call { args, .. } => Some((args.clone(), kernel.block_insts(kernel.entry())[0])),
                _ => None,
            })
            .unwrap();
        assert_eq!(args.len(), 6);
        assert_eq!(kernel.const_int(args[4]), Some(2));
        assert_eq!(args[5], Value::Inst(first));
        assert!(matches!(
            &kernel.inst(first).op,
            Op::Alloca { allocated, .. } if *allocated == Type::array(Type::I32, 2)
        ));
        assert!(module.function(ENQUEUE_SLM).unwrap().is_declaration());
        assert_eq!(ctx.events.count_kind(EventKind::EnqueueRewritten), 1);
    }

    #[test]
    fn test_event_overload_block_at_sixth_argument() {
        let kernel = parent(|b, literal| {
            let queue = b.const_int(32, 0);
            let flags = b.const_int(32, 0);
            let range = b.const_int(32, 64);
            let waits = b.const_int(32, 0);
            let list = b.const_int(32, 0);
            let event = b.const_int(32, 0);
            b.call(
                "enqueue_kernel_basic_events",
                vec![queue, flags, range, waits, list, event, literal],
                Type::I32,
            );
        });
        let mut module = create_module(200, vec![invoke_function(), kernel]);
        assert!(run(&mut module).0.unwrap());
        assert!(module.is_kernel(module.function(INVOKE).unwrap()));
    }

    #[test]
    fn test_global_literal_resolution() {
        let literal = GlobalVariable::new(
            "__block_literal_global",
            literal_type(),
            AddressSpace::Global,
            Constant::Aggregate {
                ty: literal_type(),
                fields: vec![
                    Constant::int(32, 16),
                    Constant::int(32, 8),
                    Constant::int(32, 0),
                    Constant::Function {
                        name: INVOKE.to_string(),
                        space: AddressSpace::Private,
                    },
                ],
            },
        );
        let mut kernel = create_kernel("parent", vec![global_ptr("out")]);
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let base = b.constant(Constant::Global {
            name: "__block_literal_global".to_string(),
            space: AddressSpace::Global,
        });
        let zero = b.const_int(32, 0);
        let three = b.const_int(32, 3);
        let field = b.gep(literal_type(), base, vec![zero, three]);
        let callee = b.load(Type::Ptr(AddressSpace::Private), field);
        b.call_indirect(callee, vec![base], Type::Void);
        b.ret(None);

        let mut module = create_module(200, vec![invoke_function(), kernel]);
        module.globals.push(literal);
        assert!(run(&mut module).0.unwrap());

        assert_eq!(
            direct_callees(module.function("parent").unwrap()),
            vec![INVOKE.to_string()]
        );
        let Some(Constant::Aggregate { fields, .. }) =
            &module.global("__block_literal_global").unwrap().initializer
        else {
            panic!("aggregate expected");
        };
        assert_eq!(fields[3], Constant::int(64, 0));
    }

    #[test]
    fn test_unresolvable_indirect_call_rejected() {
        let mut kernel = create_kernel(
            "parent",
            vec![Param::new("fp", Type::Ptr(AddressSpace::Private))],
        );
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        b.call_indirect(Value::Arg(0), vec![], Type::Void);
        b.ret(None);
        let mut module = create_module(200, vec![kernel]);
        assert!(matches!(
            run(&mut module).0,
            Err(Error::MalformedPattern { function, .. }) if function == "parent"
        ));
    }
}
