//! Program analyses over the IR.
//!
//! # Architecture
//!
//! Analyses are read-only views computed from a [`crate::ir::Function`]. They are snapshots:
//! a pass that changes the structure they describe builds a fresh one.
//!
//! - [`cfg`] - Control flow graph, dominators, natural loops, induction variables
//! - [`pointer`] - Linear decomposition of addresses
//!
//! # Usage
//!
//! ```rust
//! use genlower::analysis::ControlFlowGraph;
//! use genlower::ir::{Function, Type};
//!
//! let mut func = Function::new("f", vec![], Type::Void);
//! let entry = func.add_block("entry");
//! func.build_at_end(entry).ret(None);
//!
//! let cfg = ControlFlowGraph::from_function(&func);
//! assert!(cfg.loops().is_empty());
//! ```

pub mod cfg;
pub mod pointer;

pub use cfg::{ControlFlowGraph, InductionVar, LoopForest, LoopInfo};
pub use pointer::AddressExpr;
