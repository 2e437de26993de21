//! Pass traits and the state shared between pipeline stages.

use rustc_hash::FxHashSet;

use crate::{
    compiler::{EventLog, PipelineConfig},
    ir::{DataLayout, Function, Module},
    Result,
};

/// State shared by all stages of one pipeline run.
#[derive(Debug, Default)]
pub struct PassContext {
    /// Accumulated events from all passes.
    pub events: EventLog,
    /// Driver configuration.
    pub config: PipelineConfig,
}

impl PassContext {
    /// Creates a context for the given configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            events: EventLog::new(),
            config,
        }
    }
}

/// Module facts a function pass may consult while the module's functions are borrowed.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Declared language version.
    pub ocl_version: u32,
    /// Size/alignment model.
    pub layout: DataLayout,
    kernels: FxHashSet<String>,
}

impl ModuleInfo {
    /// Captures the facts of `module`.
    #[must_use]
    pub fn of(module: &Module) -> Self {
        Self {
            ocl_version: module.ocl_version,
            layout: module.layout(),
            kernels: module
                .functions
                .iter()
                .filter(|f| module.is_kernel(f))
                .map(|f| f.name().to_string())
                .collect(),
        }
    }

    /// Returns true when the named function is a kernel entry point.
    #[must_use]
    pub fn is_kernel(&self, name: &str) -> bool {
        self.kernels.contains(name)
    }

    /// Address size in bits.
    #[must_use]
    pub const fn pointer_bits(&self) -> u32 {
        self.layout.pointer_bits()
    }

    /// Returns true for language version 2.0 and later.
    #[must_use]
    pub const fn is_ocl20(&self) -> bool {
        self.ocl_version >= 200
    }
}

/// A pass that needs to see (and may restructure) the whole module.
pub trait ModulePass {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Runs the pass. Returns `true` if the module changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the module contains a construct the pass cannot handle.
    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool>;
}

/// A pass that rewrites one function at a time.
pub trait FunctionPass {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Should this pass run on a specific function?
    ///
    /// Declarations are never passed to [`FunctionPass::run_on_function`].
    fn should_run(&self, _func: &Function, _info: &ModuleInfo) -> bool {
        true
    }

    /// Runs the pass on one function. Returns `true` if the function changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the function contains a construct the pass cannot handle.
    fn run_on_function(
        &self,
        func: &mut Function,
        info: &ModuleInfo,
        ctx: &PassContext,
    ) -> Result<bool>;
}

/// Runs a function pass over every defined function of `module`.
///
/// # Errors
///
/// Propagates the first error of the pass.
pub fn run_function_pass(
    pass: &dyn FunctionPass,
    module: &mut Module,
    ctx: &PassContext,
) -> Result<bool> {
    let info = ModuleInfo::of(module);
    let mut changed = false;
    for func in &mut module.functions {
        if func.is_declaration() || !pass.should_run(func, &info) {
            continue;
        }
        log::trace!("{}: running on @{}", pass.name(), func.name());
        changed |= pass.run_on_function(func, &info, ctx)?;
    }
    Ok(changed)
}
