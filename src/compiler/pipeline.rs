//! The ordered lowering pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Pipeline::standard                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  constexpr-expansion         module constants → instructions      │
//! │  attribute-normalization     C convention, inline + internal      │
//! │  barrier-nodup (on)          protect barriers from duplication    │
//! │  always-inline               inline helpers into kernels          │
//! │  barrier-nodup (off)                                              │
//! │  integer-legalization        > 64-bit integers → 64-bit limbs     │
//! │  scalarization               vector values → scalar lanes         │
//! │  gep-lowering                GEP → integer address arithmetic     │
//! │  load-store-merging          adjacent scalars → vector accesses   │
//! │  loop-unroll-advisor         forced unroll hints                  │
//! │  sampler-folding             sampler predicate calls → values     │
//! │  device-enqueue              block indirection → direct calls     │
//! │  library-link (optional)     merge the prebuilt library           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stages run once each, in order; each assumes the invariants established by the earlier
//! ones. The first error aborts the run and is returned unchanged.

use std::time::Instant;

use crate::{
    compiler::{
        pass::run_function_pass,
        passes::{
            AlwaysInlinerPass, AttributeNormalizationPass, BarrierDuplicationPass,
            ConstantExpansionPass, DeviceEnqueuePass, GepLoweringPass, IntegerLegalizationPass,
            LoadStoreMergingPass, LoopUnrollAdvisorPass, SamplerFoldingPass, ScalarizationPass,
        },
        EventKind, EventLog, FunctionPass, ModulePass, PassContext, PipelineConfig,
    },
    ir::Module,
    linker::LinkerPass,
    Result,
};

/// One pipeline stage.
pub enum Stage {
    /// Runs once over the whole module.
    Module(Box<dyn ModulePass>),
    /// Runs on every function with a body.
    Function(Box<dyn FunctionPass>),
}

impl Stage {
    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Module(pass) => pass.name(),
            Stage::Function(pass) => pass.name(),
        }
    }

    /// Stage description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Module(pass) => pass.description(),
            Stage::Function(pass) => pass.description(),
        }
    }

    fn run(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        match self {
            Stage::Module(pass) => pass.run_on_module(module, ctx),
            Stage::Function(pass) => run_function_pass(pass.as_ref(), module, ctx),
        }
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// All events recorded by the stages
    pub events: EventLog,
    /// Names of the stages that changed the module, in execution order
    pub changed: Vec<&'static str>,
}

impl PipelineReport {
    /// Returns true when at least one stage changed the module.
    #[must_use]
    pub fn any_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// A static ordered list of stages sharing one configuration.
pub struct Pipeline {
    stages: Vec<Stage>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            stages: Vec::new(),
            config,
        }
    }

    /// The standard lowering sequence for `config`.
    #[must_use]
    pub fn standard(config: &PipelineConfig) -> Self {
        let mut pipeline = Self::new(config.clone())
            .function_pass(ConstantExpansionPass::new())
            .module_pass(AttributeNormalizationPass::new())
            .module_pass(BarrierDuplicationPass::new(true))
            .module_pass(AlwaysInlinerPass::new())
            .module_pass(BarrierDuplicationPass::new(false))
            .function_pass(IntegerLegalizationPass::new())
            .function_pass(ScalarizationPass::new())
            .function_pass(GepLoweringPass::new())
            .function_pass(LoadStoreMergingPass::new())
            .function_pass(LoopUnrollAdvisorPass::new(config.unroll_ceiling))
            .function_pass(SamplerFoldingPass::new())
            .module_pass(DeviceEnqueuePass::new());
        if config.link {
            pipeline = pipeline.module_pass(LinkerPass::new());
        }
        pipeline
    }

    /// Appends a module pass.
    #[must_use]
    pub fn module_pass(mut self, pass: impl ModulePass + 'static) -> Self {
        self.stages.push(Stage::Module(Box::new(pass)));
        self
    }

    /// Appends a function pass.
    #[must_use]
    pub fn function_pass(mut self, pass: impl FunctionPass + 'static) -> Self {
        self.stages.push(Stage::Function(Box::new(pass)));
        self
    }

    /// The stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs every stage on `module`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a stage; the module is left as that stage left it.
    pub fn run(&self, module: &mut Module) -> Result<PipelineReport> {
        let ctx = PassContext::new(self.config.clone());
        let mut changed = Vec::new();

        for stage in &self.stages {
            let name = stage.name();
            let started = Instant::now();
            log::debug!("{name}: start");
            ctx.events.record(EventKind::PassStarted).pass(name);

            let stage_changed = stage.run(module, &ctx)?;

            log::debug!(
                "{name}: done in {:?} ({})",
                started.elapsed(),
                if stage_changed { "changed" } else { "unchanged" }
            );
            ctx.events
                .record(EventKind::PassCompleted)
                .pass(name)
                .message(if stage_changed { "changed" } else { "unchanged" });
            if stage_changed {
                changed.push(name);
            }
        }

        Ok(PipelineReport {
            events: ctx.events,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(&PipelineConfig::default());
        let names: Vec<_> = pipeline.stages().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec![
                "constexpr-expansion",
                "attribute-normalization",
                "barrier-nodup",
                "always-inline",
                "barrier-nodup",
                "integer-legalization",
                "scalarization",
                "gep-lowering",
                "load-store-merging",
                "loop-unroll-advisor",
                "sampler-folding",
                "device-enqueue",
            ]
        );
        let linked = Pipeline::standard(&PipelineConfig::with_library("/nowhere"));
        assert_eq!(
            linked.stages().last().map(Stage::name),
            Some("library-link")
        );
    }

    #[test]
    fn test_empty_module_reports_pass_events() {
        let mut module = Module::new("m", 120);
        let report = Pipeline::standard(&PipelineConfig::default())
            .run(&mut module)
            .unwrap();
        assert!(!report.any_changed());
        assert_eq!(report.events.count_kind(EventKind::PassStarted), 12);
        assert_eq!(report.events.count_kind(EventKind::PassCompleted), 12);
    }
}
