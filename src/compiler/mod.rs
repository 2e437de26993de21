//! Compiler infrastructure for the lowering pipeline.
//!
//! This module sits between the IR and its consumers:
//!
//! - [`crate::ir`] - object model, builders, evaluator
//! - [`crate::analysis`] - CFG, loops, address decomposition
//! - [`compiler`](self) - passes, pipeline driver, event log
//! - [`crate::linker`] - library merging
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PipelineConfig              Driver options (library, math,      │
//! │                              linking, unroll ceiling)            │
//! │                                                                  │
//! │  Pipeline                    Static ordered stage list           │
//! │    ├─ Stage::Module           Whole-module passes                │
//! │    └─ Stage::Function         Per-function passes                │
//! │                                                                  │
//! │  ModulePass / FunctionPass   Interfaces for all passes           │
//! │    ├─ name(), description()                                      │
//! │    └─ run_on_module() / run_on_function() -> Result<bool>        │
//! │                                                                  │
//! │  PassContext                 Shared state of one run             │
//! │    ├─ EventLog               Change tracking and diagnostics     │
//! │    └─ PipelineConfig                                             │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod events;
mod pass;
mod passes;
mod pipeline;

pub use config::{PipelineConfig, DEFAULT_UNROLL_CEILING, LIBRARY_PATH_ENV};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::{run_function_pass, FunctionPass, ModuleInfo, ModulePass, PassContext};
pub use passes::{
    AlwaysInlinerPass, AttributeNormalizationPass, BarrierDuplicationPass, ConstantExpansionPass,
    DeviceEnqueuePass, GepLoweringPass, IntegerLegalizationPass, LoadStoreMergingPass,
    LoopUnrollAdvisorPass, SamplerFoldingPass, ScalarizationPass,
};
pub use pipeline::{Pipeline, PipelineReport, Stage};
