//! Built-in lowering passes.
//!
//! Each pass is a unit struct implementing [`crate::compiler::ModulePass`] or
//! [`crate::compiler::FunctionPass`]. They are listed here in pipeline order.

mod attributes;
mod barrier;
mod constexpr;
mod enqueue;
mod gep;
mod inline;
mod legalize;
mod loadstore;
mod sampler;
mod scalarize;
mod unroll;

pub use attributes::AttributeNormalizationPass;
pub use barrier::{BarrierDuplicationPass, BARRIER_FUNCTIONS};
pub use constexpr::ConstantExpansionPass;
pub use enqueue::DeviceEnqueuePass;
pub use gep::GepLoweringPass;
pub use inline::AlwaysInlinerPass;
pub use legalize::IntegerLegalizationPass;
pub use loadstore::LoadStoreMergingPass;
pub use sampler::SamplerFoldingPass;
pub use scalarize::ScalarizationPass;
pub use unroll::LoopUnrollAdvisorPass;
