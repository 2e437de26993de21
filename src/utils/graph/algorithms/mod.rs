//! Graph algorithms for program analysis.
//!
//! # Available Algorithms
//!
//! ## Traversal
//!
//! - [`postorder`] - Postorder traversal
//! - [`reverse_postorder`] - Reverse postorder traversal (definitions before uses)
//!
//! ## Dominator Analysis
//!
//! - [`compute_dominators`] - Dominator tree of a rooted graph
//! - [`DominatorTree`] - Result of dominator computation
//!
//! # Algorithm Selection
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Reverse postorder | O(V + E) | Forward rewrites, legalization order |
//! | Dominators | O(V + E) per sweep | Loop detection |

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
