//! Kernel intermediate representation.
//!
//! This module holds the SSA representation every pass operates on. It is deliberately small:
//! only the instruction kinds, types and metadata that appear in front-end output for GPU
//! kernels are modelled, and the representation is plain data that serializes to JSON.
//!
//! # Architecture
//!
//! ```text
//! Module
//!   ├── globals       Vec<GlobalVariable>
//!   ├── functions     Vec<Function>
//!   │     ├── params, blocks, instruction arena, constant pool
//!   │     ├── kernel_args     (kernel metadata, if any)
//!   │     └── loop_hints      (per loop header)
//!   ├── kernel_list   (kernels named at module level)
//!   └── block_functions (device-enqueue dispatch table)
//! ```
//!
//! Values are `Copy` handles ([`Value`], [`InstId`], [`BlockId`]) into the owning function.
//! Instructions carry an [`Op`] and a result [`Type`]. Pointers are opaque: their pointee type
//! is stated by each load, store and address computation.
//!
//! # Key Components
//!
//! - [`Function`] / [`InstBuilder`] - Body storage, use queries and instruction construction
//! - [`Op`] - Sum type over all instruction kinds
//! - [`Constant`] / [`ConstExpr`] - Constants and deferred constant expressions
//! - [`ApInt`] - Arbitrary-width integers for constants wider than 64 bits
//! - [`DataLayout`] - Target sizes, alignments and field offsets
//! - [`eval::Evaluator`] - Reference evaluator used to check rewrites

mod apint;
mod builder;
mod constant;
mod display;
pub mod eval;
pub(crate) mod function;
mod layout;
mod module;
mod ops;
mod types;
mod value;

pub use apint::ApInt;
pub use builder::InstBuilder;
pub use constant::{ConstExpr, Constant};
pub use display::DisplayValue;
pub use function::{
    Block, FnAttributes, Function, Instruction, KernelArgInfo, Linkage, LoopHint, Param,
};
pub use layout::{padding, DataLayout};
pub use module::{GlobalVariable, Module};
pub use ops::{
    Access, BinaryOp, CallConv, Callee, CastOp, FloatPredicate, IntPredicate, Intrinsic, Op,
};
pub use types::{AddressSpace, FloatKind, Type};
pub use value::{BlockId, ConstId, InstId, Value};
