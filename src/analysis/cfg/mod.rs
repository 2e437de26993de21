//! Control flow graph construction and loop analysis.
//!
//! # Architecture
//!
//! The CFG is a snapshot of a [`crate::ir::Function`]'s block structure built on the generic
//! graph traits in [`crate::utils::graph`], so the shared traversal and dominator algorithms
//! apply to it directly.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Successor/predecessor lists with lazily cached analyses
//! - [`LoopForest`] - Natural loops with nesting
//! - [`LoopInfo`] - One loop: header, latches, body, exits, parent
//! - [`InductionVar`] - Basic induction variable of a loop
//!
//! # Lazy Computation
//!
//! Dominator trees and loop forests are computed on first access and cached inside the
//! snapshot using [`std::sync::OnceLock`].

mod graph;
mod loops;

pub use graph::ControlFlowGraph;
pub use loops::{
    detect_loops, InductionUpdateKind, InductionVar, LoopExit, LoopForest, LoopInfo,
};
