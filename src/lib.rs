// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # genlower
//!
//! IR legalization and lowering for a wide-SIMD GPU backend.
//!
//! `genlower` takes kernels that a front-end has already lowered to typed SSA form and
//! rewrites them into the subset a fixed-function instruction selector can consume: no
//! constant expressions, no integers wider than 64 bits, no structured address computation,
//! no vector arithmetic, and no block-literal indirection for device-side enqueue.
//!
//! ## Features
//!
//! - **Integer legalization** - Oversized integers split into 64-bit limbs
//! - **Scalarization** - Vector arithmetic rewritten lane by lane
//! - **Address lowering** - Structured addressing turned into byte arithmetic using the target layout
//! - **Access merging** - Adjacent scalar loads and stores fused into vector accesses
//! - **Target heuristics** - Barrier duplication control and forced unrolling of small loop nests
//! - **Library linking** - Lazy, memory-mapped merging of the prebuilt builtin library
//!
//! ## Quick Start
//!
//! ```rust
//! use genlower::prelude::*;
//!
//! let mut module = Module::new("kernels", 200);
//! let mut kernel = Function::new(
//!     "scale",
//!     vec![Param::new("data", Type::Ptr(AddressSpace::Global))],
//!     Type::Void,
//! );
//! kernel.kernel_args = Some(KernelArgInfo::default());
//! let entry = kernel.add_block("entry");
//! let mut b = kernel.build_at_end(entry);
//! let index = b.const_int(32, 3);
//! let slot = b.gep(Type::F32, Value::Arg(0), vec![index]);
//! let value = b.load(Type::F32, slot);
//! let doubled = b.binary(BinaryOp::FAdd, value, value);
//! b.store(doubled, slot);
//! b.ret(None);
//! module.add_function(kernel);
//!
//! let report = Pipeline::standard(&PipelineConfig::default()).run(&mut module)?;
//! assert!(report.changed.contains(&"gep-lowering"));
//! # Ok::<(), genlower::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - Object model, builders, printer and reference evaluator
//! - [`analysis`] - Control flow graphs, loops, induction variables, address decomposition
//! - [`compiler`] - Passes, the pipeline driver and the event log
//! - [`linker`] - Merging of the prebuilt library module
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### Pipeline
//!
//! See [`compiler::Pipeline::standard`] for the stage order. Every stage reports whether it
//! changed the module; the first error stops the run.
#[macro_use]
pub(crate) mod error;

/// Shared fixtures used by unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use genlower::prelude::*;
///
/// let module = Module::new("m", 120);
/// assert_eq!(module.layout().pointer_bytes(), 4);
/// ```
pub mod prelude;

/// Kernel intermediate representation.
///
/// # Key Types
///
/// - [`ir::Module`] - Functions, globals and kernel metadata
/// - [`ir::Function`] - Blocks, instruction arena and constant pool
/// - [`ir::Op`] - All instruction kinds
/// - [`ir::InstBuilder`] - Cursor-based instruction construction
pub mod ir;

/// Analyses over the IR: control flow, loops and addresses.
pub mod analysis;

/// Lowering passes and the pipeline that runs them.
pub mod compiler;

/// Merging of kernel modules with the prebuilt library.
pub mod linker;

/// Graph traits and algorithms shared by the analyses.
pub mod utils;

/// `genlower` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
///
/// # Examples
///
/// ```rust
/// use genlower::{ir::Module, Result};
///
/// fn load(path: &str) -> Result<Module> {
///     Module::load(path)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `genlower` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Lowering pipeline entry points.
///
/// See [`compiler::Pipeline`] and [`compiler::PipelineConfig`].
pub use compiler::{Pipeline, PipelineConfig, PipelineReport};
