//! Shared utilities used by the analyses and passes.
//!
//! - [`graph`] - Graph traits, traversal orders and dominator trees

pub mod graph;
