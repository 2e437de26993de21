//! # genlower Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the genlower library. Import this module to get quick access to the IR, the
//! pipeline and its configuration.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all genlower operations
pub use crate::Error;

/// The result type used throughout genlower
pub use crate::Result;

// ================================================================================================
// Pipeline
// ================================================================================================

/// Pipeline driver, its configuration and its report
pub use crate::compiler::{Pipeline, PipelineConfig, PipelineReport};

/// Pass interfaces and event tracking
pub use crate::compiler::{EventKind, EventLog, FunctionPass, ModulePass, PassContext};

// ================================================================================================
// IR
// ================================================================================================

/// Module-level object model
pub use crate::ir::{GlobalVariable, KernelArgInfo, Module};

/// Function bodies and construction
pub use crate::ir::{Function, InstBuilder, Param};

/// Values, types and constants
pub use crate::ir::{AddressSpace, Constant, Type, Value};

/// Instruction kinds
pub use crate::ir::{BinaryOp, CastOp, IntPredicate, Op};

// ================================================================================================
// Analysis
// ================================================================================================

/// Control flow and loop analysis
pub use crate::analysis::{ControlFlowGraph, LoopForest};
