//! Functions: blocks, the instruction arena and the constant pool.
//!
//! # Architecture
//!
//! ```text
//! Function
//!   ├── params      Vec<Param>          (Value::Arg(i))
//!   ├── blocks      Vec<Block>          (BlockId(i), layout order; block 0 is the entry)
//!   │     └── insts Vec<InstId>         (program order within the block)
//!   ├── insts       Vec<Instruction>    (arena; InstId(i), never reused)
//!   └── consts      Vec<Constant>       (pool; Value::Const(ConstId(i)))
//! ```
//!
//! Instructions are never physically removed from the arena. Removal happens in two steps
//! that passes can separate when they delete groups of mutually dependent instructions:
//! [`Function::detach`] drops the operands (the op becomes [`Op::Detached`]) and
//! [`Function::erase`] unlinks the instruction from its block. Use lists are not cached; they
//! are recomputed by scanning the linked instructions.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    ir::{BlockId, CallConv, ConstId, Constant, InstId, InstBuilder, Op, Type, Value},
    Result,
};

bitflags! {
    /// Function attributes relevant to the pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FnAttributes: u32 {
        /// Must be inlined into every caller.
        const ALWAYS_INLINE = 0x01;
        /// Must never be inlined.
        const NO_INLINE = 0x02;
        /// Calls must not be duplicated by control-flow transformations.
        const NO_DUPLICATE = 0x04;
        /// Does not unwind.
        const NO_UNWIND = 0x08;
        /// Does not access memory.
        const READ_NONE = 0x10;
        /// Convergent operation (all work-items must reach it together).
        const CONVERGENT = 0x20;
    }
}

/// Symbol visibility.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Visible outside the module.
    #[default]
    External,
    /// Private to the module.
    Internal,
}

/// Unroll directive attached to a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopHint {
    /// Unrolling requested.
    UnrollEnable,
    /// Unrolling forbidden.
    UnrollDisable,
    /// Unroll by the given factor.
    UnrollCount(u32),
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Source-level name
    pub name: String,
    /// Parameter type
    pub ty: Type,
}

impl Param {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Per-kernel argument metadata as emitted by the front-end.
///
/// All lists are indexed by parameter position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelArgInfo {
    /// Address space number of each pointer argument (0 for non-pointers)
    pub address_spaces: Vec<u32>,
    /// Access qualifiers ("none", "read_only", ...)
    pub access_quals: Vec<String>,
    /// Source type names
    pub type_names: Vec<String>,
    /// Source base type names (typedefs resolved)
    pub base_type_names: Vec<String>,
    /// Type qualifiers ("const", "volatile", ...)
    pub type_quals: Vec<String>,
    /// Parameter names
    pub names: Vec<String>,
}

impl KernelArgInfo {
    /// Number of described arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true when no argument is described.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Replaces the entry at `index` with `count` copies suffixed by the limb number.
    pub fn expand(&mut self, index: usize, count: usize) {
        fn expand_list(list: &mut Vec<String>, index: usize, count: usize, suffix: bool) {
            if index >= list.len() {
                return;
            }
            let entry = list.remove(index);
            for i in (0..count).rev() {
                let item = if suffix {
                    format!("{entry}.{i}")
                } else {
                    entry.clone()
                };
                list.insert(index, item);
            }
        }
        if index < self.address_spaces.len() {
            let space = self.address_spaces.remove(index);
            for _ in 0..count {
                self.address_spaces.insert(index, space);
            }
        }
        expand_list(&mut self.access_quals, index, count, false);
        expand_list(&mut self.type_names, index, count, false);
        expand_list(&mut self.base_type_names, index, count, false);
        expand_list(&mut self.type_quals, index, count, false);
        expand_list(&mut self.names, index, count, true);
    }
}

/// An instruction: an operation, its result type and its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation and operands
    pub op: Op,
    /// Result type ([`Type::Void`] when the instruction produces no value)
    pub ty: Type,
    /// Optional source-level name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    block: Option<BlockId>,
}

impl Instruction {
    /// Block the instruction is linked into, `None` once erased.
    #[must_use]
    pub const fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Returns true while the instruction is linked into a block.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.block.is_some()
    }
}

/// A basic block: a label and an ordered list of instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Label
    pub name: String,
    insts: Vec<InstId>,
}

impl Block {
    /// Instructions in program order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

/// A function definition or declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    name: String,
    params: Vec<Param>,
    ret: Type,
    #[serde(default)]
    variadic: bool,
    /// Linkage of the symbol
    #[serde(default)]
    pub linkage: Linkage,
    /// Calling convention
    #[serde(default)]
    pub call_conv: CallConv,
    /// Attributes
    #[serde(default)]
    pub attrs: FnAttributes,
    /// Kernel argument metadata; present on kernel entry points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_args: Option<KernelArgInfo>,
    #[serde(default)]
    blocks: Vec<Block>,
    #[serde(default)]
    insts: Vec<Instruction>,
    #[serde(default)]
    consts: Vec<Constant>,
    /// Loop directives keyed by loop header block
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_hints: BTreeMap<BlockId, LoopHint>,
}

impl Function {
    /// Creates a function without blocks (a declaration until a block is added).
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            variadic: false,
            linkage: Linkage::External,
            call_conv: CallConv::C,
            attrs: FnAttributes::empty(),
            kernel_args: None,
            blocks: Vec::new(),
            insts: Vec::new(),
            consts: Vec::new(),
            loop_hints: BTreeMap::new(),
        }
    }

    /// Creates a variadic declaration.
    #[must_use]
    pub fn new_variadic(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        let mut func = Self::new(name, params, ret);
        func.variadic = true;
        func
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the function.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Parameters.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Mutable parameters.
    pub fn params_mut(&mut self) -> &mut Vec<Param> {
        &mut self.params
    }

    /// Return type.
    #[must_use]
    pub fn ret_type(&self) -> &Type {
        &self.ret
    }

    /// Returns true when the function accepts extra variadic arguments.
    #[must_use]
    pub const fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Returns true when the function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns true for the target-independent intrinsic namespace.
    #[must_use]
    pub fn is_intrinsic(&self) -> bool {
        self.name.starts_with("llvm.")
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Entry block.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block ids in layout order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len()).map(BlockId::new)
    }

    /// Returns a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Instructions of a block in program order.
    #[must_use]
    pub fn block_insts(&self, id: BlockId) -> &[InstId] {
        &self.blocks[id.index()].insts
    }

    /// Appends a new empty block.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.push(Block {
            name: name.into(),
            insts: Vec::new(),
        });
        BlockId::new(self.blocks.len() - 1)
    }

    /// Terminator of a block, if the block is terminated.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()]
            .insts
            .last()
            .copied()
            .filter(|id| self.insts[id.index()].op.is_terminator())
    }

    /// Successor blocks.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.insts[t.index()].op.successors())
            .unwrap_or_default()
    }

    /// Predecessor blocks, in layout order.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|b| self.successors(*b).contains(&block))
            .collect()
    }

    /// First instruction of a block that is not a phi node.
    #[must_use]
    pub fn first_non_phi(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()]
            .insts
            .iter()
            .copied()
            .find(|id| !self.insts[id.index()].op.is_phi())
    }

    /// Moves every instruction of `block` starting at position `at` into a new block.
    ///
    /// Phi nodes in successors of the moved terminator are updated to name the new block.
    pub fn split_block(&mut self, block: BlockId, at: usize, name: impl Into<String>) -> BlockId {
        let tail: Vec<InstId> = self.blocks[block.index()].insts.split_off(at);
        let new_block = self.add_block(name);
        for id in &tail {
            self.insts[id.index()].block = Some(new_block);
        }
        self.blocks[new_block.index()].insts = tail;
        for succ in self.successors(new_block) {
            for id in self.blocks[succ.index()].insts.clone() {
                let inst = &mut self.insts[id.index()];
                if inst.op.is_phi() {
                    inst.op.replace_block(block, new_block);
                }
            }
        }
        new_block
    }

    // ── Instructions ────────────────────────────────────────────────────

    /// Returns an instruction.
    #[must_use]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    /// Returns a mutable instruction.
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    /// Returns the op of the instruction defining `value`, if it is an instruction.
    #[must_use]
    pub fn def_op(&self, value: Value) -> Option<&Op> {
        value.as_inst().map(|id| &self.insts[id.index()].op)
    }

    /// Number of arena slots (including erased instructions).
    #[must_use]
    pub fn inst_capacity(&self) -> usize {
        self.insts.len()
    }

    /// All linked instructions in layout order.
    #[must_use]
    pub fn live_insts(&self) -> Vec<InstId> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
            .collect()
    }

    /// Position of an instruction as (block, index within block).
    #[must_use]
    pub fn position(&self, id: InstId) -> Option<(BlockId, usize)> {
        let block = self.insts[id.index()].block?;
        self.blocks[block.index()]
            .insts
            .iter()
            .position(|i| *i == id)
            .map(|pos| (block, pos))
    }

    fn push_inst(&mut self, op: Op, ty: Type, block: BlockId) -> InstId {
        self.insts.push(Instruction {
            op,
            ty,
            name: None,
            block: Some(block),
        });
        InstId::new(self.insts.len() - 1)
    }

    /// Inserts a new instruction at `index` within `block`.
    pub fn insert_inst(&mut self, block: BlockId, index: usize, op: Op, ty: Type) -> InstId {
        let id = self.push_inst(op, ty, block);
        let insts = &mut self.blocks[block.index()].insts;
        let index = index.min(insts.len());
        insts.insert(index, id);
        id
    }

    /// Appends an instruction at the end of `block`.
    pub fn append_inst(&mut self, block: BlockId, op: Op, ty: Type) -> InstId {
        let len = self.blocks[block.index()].insts.len();
        self.insert_inst(block, len, op, ty)
    }

    /// Moves a linked instruction to `index` within `block`.
    pub fn move_inst(&mut self, id: InstId, block: BlockId, index: usize) {
        self.unlink(id);
        let insts = &mut self.blocks[block.index()].insts;
        let index = index.min(insts.len());
        insts.insert(index, id);
        self.insts[id.index()].block = Some(block);
    }

    fn unlink(&mut self, id: InstId) {
        if let Some(block) = self.insts[id.index()].block.take() {
            self.blocks[block.index()].insts.retain(|i| *i != id);
        }
    }

    /// Drops all operands of an instruction; the op becomes [`Op::Detached`].
    pub fn detach(&mut self, id: InstId) {
        self.insts[id.index()].op = Op::Detached;
    }

    /// Unlinks an instruction from its block.
    pub fn erase(&mut self, id: InstId) {
        self.unlink(id);
    }

    /// Detaches and erases one instruction.
    pub fn remove(&mut self, id: InstId) {
        self.detach(id);
        self.erase(id);
    }

    /// Detaches every instruction in `ids`, then erases them.
    pub fn remove_all(&mut self, ids: &[InstId]) {
        for id in ids {
            self.detach(*id);
        }
        for id in ids {
            self.erase(*id);
        }
    }

    /// Linked instructions that use `value` as an operand.
    #[must_use]
    pub fn users(&self, value: Value) -> Vec<InstId> {
        self.live_insts()
            .into_iter()
            .filter(|id| {
                let mut found = false;
                self.insts[id.index()].op.visit_operands(|v| found |= v == value);
                found
            })
            .collect()
    }

    /// Returns true when some linked instruction uses `value`.
    #[must_use]
    pub fn has_users(&self, value: Value) -> bool {
        self.blocks.iter().flat_map(|b| b.insts.iter()).any(|id| {
            let mut found = false;
            self.insts[id.index()].op.visit_operands(|v| found |= v == value);
            found
        })
    }

    /// Replaces every use of `from` in linked instructions with `to`.
    ///
    /// Returns the number of instructions rewritten.
    pub fn replace_all_uses(&mut self, from: Value, to: Value) -> usize {
        let mut count = 0;
        for id in self.live_insts() {
            if self.insts[id.index()].op.replace_operand(from, to) {
                count += 1;
            }
        }
        count
    }

    /// Creates a builder inserting before `anchor`.
    pub fn build_before(&mut self, anchor: InstId) -> Result<InstBuilder<'_>> {
        InstBuilder::before(self, anchor)
    }

    /// Creates a builder inserting immediately after `anchor`.
    pub fn build_after(&mut self, anchor: InstId) -> Result<InstBuilder<'_>> {
        InstBuilder::after(self, anchor)
    }

    /// Creates a builder appending to `block`.
    pub fn build_at_end(&mut self, block: BlockId) -> InstBuilder<'_> {
        InstBuilder::at_end(self, block)
    }

    // ── Values and constants ────────────────────────────────────────────

    /// Adds a constant to the pool and returns a value referring to it.
    pub fn constant(&mut self, constant: Constant) -> Value {
        self.consts.push(constant);
        Value::Const(ConstId(self.consts.len() as u32 - 1))
    }

    /// Returns a pooled constant.
    #[must_use]
    pub fn const_data(&self, id: ConstId) -> &Constant {
        &self.consts[id.index()]
    }

    /// Returns the constant behind `value`, if it is one.
    #[must_use]
    pub fn as_constant(&self, value: Value) -> Option<&Constant> {
        value.as_const().map(|id| &self.consts[id.index()])
    }

    /// Returns the integer constant behind `value`, sign-interpreted, if it fits in `i64`.
    /// An `i1` true reads as -1.
    #[must_use]
    pub fn const_int(&self, value: Value) -> Option<i64> {
        self.as_constant(value)
            .and_then(Constant::as_int)
            .and_then(|v| v.to_i64())
    }

    /// Number of pooled constants.
    #[must_use]
    pub fn const_count(&self) -> usize {
        self.consts.len()
    }

    /// Returns the type of a value.
    #[must_use]
    pub fn value_type(&self, value: Value) -> Type {
        match value {
            Value::Inst(id) => self.insts[id.index()].ty.clone(),
            Value::Arg(index) => self
                .params
                .get(index as usize)
                .map_or(Type::Void, |p| p.ty.clone()),
            Value::Const(id) => self.consts[id.index()].ty(),
        }
    }

    /// Strips pointer-preserving casts (bitcast, addrspacecast) from an instruction chain.
    #[must_use]
    pub fn strip_casts(&self, mut value: Value) -> Value {
        while let Some(Op::Cast {
            op: crate::ir::CastOp::BitCast | crate::ir::CastOp::AddrSpaceCast,
            value: inner,
        }) = self.def_op(value)
        {
            value = *inner;
        }
        value
    }

    /// Appends a parameter and returns its value.
    pub fn add_param(&mut self, param: Param) -> Value {
        self.params.push(param);
        Value::Arg(self.params.len() as u32 - 1)
    }

    /// Replaces the parameter at `index` with `replacement` parameters.
    ///
    /// Uses of later parameters are renumbered. The old parameter value must have no uses left.
    pub fn splice_params(&mut self, index: usize, replacement: Vec<Param>) -> Vec<Value> {
        let added = replacement.len();
        let old_len = self.params.len();
        self.params.splice(index..=index, replacement);
        if added != 1 {
            let shift = added as i64 - 1;
            let remap: Vec<(Value, Value)> = ((index + 1)..old_len)
                .map(|old| {
                    (
                        Value::Arg(old as u32),
                        Value::Arg((old as i64 + shift) as u32),
                    )
                })
                .collect();
            let ordered: Box<dyn Iterator<Item = &(Value, Value)>> = if shift > 0 {
                Box::new(remap.iter().rev())
            } else {
                Box::new(remap.iter())
            };
            for (from, to) in ordered {
                self.replace_all_uses(*from, *to);
            }
        }
        (index..index + added)
            .map(|i| Value::Arg(i as u32))
            .collect()
    }

    /// Removes all blocks, instructions and constants, turning the function into a declaration.
    pub fn clear_body(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.consts.clear();
        self.loop_hints.clear();
    }

    /// Function names referenced by the body: direct callees and address-taken functions.
    #[must_use]
    pub fn referenced_functions(&self) -> Vec<String> {
        let mut names = Vec::new();
        for id in self.live_insts() {
            if let Op::Call {
                callee: crate::ir::Callee::Direct(name),
                ..
            } = &self.insts[id.index()].op
            {
                names.push(name.clone());
            }
        }
        for id in self.live_insts() {
            self.insts[id.index()].op.visit_operands(|v| {
                if let Some(c) = self.as_constant(v) {
                    collect_symbols(c, &mut names, &mut Vec::new());
                }
            });
        }
        names.sort();
        names.dedup();
        names
    }

    /// Global names referenced by constants in the body.
    #[must_use]
    pub fn referenced_globals(&self) -> Vec<String> {
        let mut names = Vec::new();
        for id in self.live_insts() {
            self.insts[id.index()].op.visit_operands(|v| {
                if let Some(c) = self.as_constant(v) {
                    collect_symbols(c, &mut Vec::new(), &mut names);
                }
            });
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Collects function and global names referenced by a constant.
pub(crate) fn collect_symbols(
    constant: &Constant,
    functions: &mut Vec<String>,
    globals: &mut Vec<String>,
) {
    match constant {
        Constant::Function { name, .. } => functions.push(name.clone()),
        Constant::Global { name, .. } => globals.push(name.clone()),
        Constant::Vector(items) | Constant::Aggregate { fields: items, .. } => {
            for item in items {
                collect_symbols(item, functions, globals);
            }
        }
        Constant::Expr(expr) => match expr.as_ref() {
            crate::ir::ConstExpr::Cast { value, .. } => collect_symbols(value, functions, globals),
            crate::ir::ConstExpr::Binary { lhs, rhs, .. }
            | crate::ir::ConstExpr::ICmp { lhs, rhs, .. } => {
                collect_symbols(lhs, functions, globals);
                collect_symbols(rhs, functions, globals);
            }
            crate::ir::ConstExpr::Gep { base, indices, .. } => {
                collect_symbols(base, functions, globals);
                for index in indices {
                    collect_symbols(index, functions, globals);
                }
            }
        },
        _ => {}
    }
}
