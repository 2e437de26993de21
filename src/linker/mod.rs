//! Linking kernel modules against the prebuilt library.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  search path  ┌──────────────────────────────┐
//! │ PipelineConfig │ ────────────► │ Library (mmap, lazy bodies)  │
//! └────────────────┘               └──────────────┬───────────────┘
//!                                                 │ materialize on demand
//!           kernels + builtins ──► reachability ──┤
//!                                                 ▼
//!                         merge ──► internalize ──► global DCE
//! ```
//!
//! Starting from every kernel and from a fixed set of memcpy/memset helpers the backend
//! calls implicitly, referenced functions are materialized from the library (the kernel
//! module's own definitions take precedence). The result keeps only the kernels and builtins
//! visible and drops everything unreachable from them.

mod library;

pub use library::Library;

use rustc_hash::FxHashSet;

use crate::{
    compiler::{EventKind, ModulePass, PassContext, LIBRARY_PATH_ENV},
    ir::{function::collect_symbols, Constant, Function, Linkage, Module},
    Error, Result,
};

/// Library global selecting the fast math paths.
pub const FASTPATH_FLAG: &str = "__ocl_math_fastpath_flag";

const COPY_DIRECTIONS: [&str; 12] = [
    "gg", "gp", "gl", "pg", "pp", "pl", "lg", "lp", "ll", "pc", "gc", "lc",
];
const SET_SPACES: [&str; 3] = ["p", "g", "l"];
const GENERIC_COPY_DIRECTIONS: [&str; 8] = ["gn", "pn", "ln", "ng", "np", "nl", "nc", "nn"];

/// Helpers the backend may call without a visible call site, for `ocl_version`.
#[must_use]
pub fn builtin_functions(ocl_version: u32) -> Vec<String> {
    let mut base: Vec<String> = COPY_DIRECTIONS
        .iter()
        .map(|d| format!("__gen_memcpy_{d}"))
        .chain(SET_SPACES.iter().map(|s| format!("__gen_memset_{s}")))
        .collect();
    if ocl_version >= 200 {
        base.extend(
            GENERIC_COPY_DIRECTIONS
                .iter()
                .map(|d| format!("__gen_memcpy_{d}"))
                .chain(std::iter::once("__gen_memset_n".to_string())),
        );
    }
    let aligned: Vec<String> = base.iter().map(|name| format!("{name}_align")).collect();
    base.extend(aligned);
    base
}

/// What a link changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSummary {
    /// Functions copied from the library, in materialization order
    pub linked: Vec<String>,
    /// Symbols whose linkage became internal
    pub internalized: usize,
    /// Functions and globals removed as unreachable
    pub removed: Vec<String>,
    /// Declared functions neither the module nor the library defines
    pub undefined: Vec<String>,
}

/// Collects the functions a link needs, materializing library bodies as it goes.
struct Materializer<'a> {
    module: &'a Module,
    library: &'a Library,
    seen: FxHashSet<String>,
    pulled: Vec<Function>,
    undefined: Vec<String>,
}

impl<'a> Materializer<'a> {
    fn new(module: &'a Module, library: &'a Library) -> Self {
        Self {
            module,
            library,
            seen: FxHashSet::default(),
            pulled: Vec::new(),
            undefined: Vec::new(),
        }
    }

    /// Makes `name` and everything it references available.
    fn require(&mut self, name: &str) -> Result<()> {
        if name.starts_with("llvm.") || !self.seen.insert(name.to_string()) {
            return Ok(());
        }
        if let Some(own) = self.module.function(name).filter(|f| !f.is_declaration()) {
            return self.walk(own);
        }
        if let Some(func) = self.library.materialize(name)? {
            self.walk(&func)?;
            self.pulled.push(func);
            return Ok(());
        }
        if self.module.function(name).is_some() {
            log::warn!("@{name} is declared but defined nowhere");
            self.undefined.push(name.to_string());
            return Ok(());
        }
        Err(Error::MissingSymbol(name.to_string()))
    }

    fn walk(&mut self, func: &Function) -> Result<()> {
        for callee in func.referenced_functions() {
            self.require(&callee)?;
        }
        Ok(())
    }
}

/// Links `module` against `library`.
///
/// # Errors
///
/// Returns [`Error::NoKernels`] for a module without kernels, [`Error::MissingSymbol`] when a
/// referenced function or builtin exists nowhere, and materialization errors of the library.
pub fn link(module: &mut Module, library: &Library, strict_math: bool) -> Result<LinkSummary> {
    let kernels = module.kernel_names();
    if kernels.is_empty() {
        return Err(Error::NoKernels(module.name.clone()));
    }
    let builtins = builtin_functions(module.ocl_version);

    let mut materializer = Materializer::new(module, library);
    for kernel in &kernels {
        materializer.seen.insert(kernel.clone());
        if let Some(func) = module.function(kernel) {
            materializer.walk(func)?;
        }
    }
    for builtin in &builtins {
        materializer.require(builtin)?;
    }
    let Materializer {
        pulled, undefined, ..
    } = materializer;

    let mut summary = LinkSummary {
        undefined,
        ..LinkSummary::default()
    };
    for func in pulled {
        let defined = module
            .function(func.name())
            .is_some_and(|own| !own.is_declaration());
        if defined {
            continue;
        }
        summary.linked.push(func.name().to_string());
        module.add_function(func);
    }
    for global in library.globals() {
        let defined = module
            .global(&global.name)
            .is_some_and(|own| own.initializer.is_some());
        if defined {
            continue;
        }
        match module.global_mut(&global.name) {
            Some(slot) => *slot = global.clone(),
            None => module.globals.push(global.clone()),
        }
    }
    let flag = module
        .global_mut(FASTPATH_FLAG)
        .ok_or_else(|| Error::MissingSymbol(FASTPATH_FLAG.to_string()))?;
    flag.initializer = Some(Constant::int(32, u64::from(!strict_math)));

    let roots: FxHashSet<String> = kernels.into_iter().chain(builtins).collect();
    summary.internalized = internalize(module, &roots);
    summary.removed = global_dce(module, &roots);
    Ok(summary)
}

/// Gives internal linkage to every defined symbol outside `roots`; returns how many changed.
fn internalize(module: &mut Module, roots: &FxHashSet<String>) -> usize {
    let mut changed = 0;
    for func in &mut module.functions {
        if func.is_declaration() {
            continue;
        }
        let linkage = if roots.contains(func.name()) {
            Linkage::External
        } else {
            Linkage::Internal
        };
        if func.linkage != linkage {
            func.linkage = linkage;
            changed += usize::from(linkage == Linkage::Internal);
        }
    }
    for global in &mut module.globals {
        if global.initializer.is_some() && global.linkage != Linkage::Internal {
            global.linkage = Linkage::Internal;
            changed += 1;
        }
    }
    changed
}

/// Removes functions and globals not reachable from `roots`; returns the removed names.
fn global_dce(module: &mut Module, roots: &FxHashSet<String>) -> Vec<String> {
    let mut live_functions: FxHashSet<String> = FxHashSet::default();
    let mut live_globals: FxHashSet<String> = FxHashSet::default();
    let mut work: Vec<String> = roots
        .iter()
        .filter(|name| module.function(name).is_some())
        .cloned()
        .collect();

    while let Some(name) = work.pop() {
        if !live_functions.insert(name.clone()) {
            continue;
        }
        let Some(func) = module.function(&name) else {
            continue;
        };
        work.extend(func.referenced_functions());
        let mut pending_globals = func.referenced_globals();
        while let Some(global) = pending_globals.pop() {
            if !live_globals.insert(global.clone()) {
                continue;
            }
            if let Some(init) = module.global(&global).and_then(|g| g.initializer.as_ref()) {
                let mut functions = Vec::new();
                collect_symbols(init, &mut functions, &mut pending_globals);
                work.extend(functions);
            }
        }
    }
    let mut removed = Vec::new();
    module.functions.retain(|f| {
        let keep = live_functions.contains(f.name());
        if !keep {
            removed.push(f.name().to_string());
        }
        keep
    });
    module.globals.retain(|g| {
        let keep = live_globals.contains(&g.name);
        if !keep {
            removed.push(g.name.clone());
        }
        keep
    });
    removed
}

/// Final pipeline stage: links the module against the library on the configured search path.
pub struct LinkerPass;

impl Default for LinkerPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkerPass {
    /// Creates a new linker pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for LinkerPass {
    fn name(&self) -> &'static str {
        "library-link"
    }

    fn description(&self) -> &'static str {
        "Merges the prebuilt library and drops unreachable symbols"
    }

    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        let search_path = ctx
            .config
            .library_search_path()
            .ok_or_else(|| Error::LibraryNotFound(format!("${LIBRARY_PATH_ENV}")))?;
        let library = Library::find(&search_path)?;
        let summary = link(module, &library, ctx.config.strict_math)?;

        for name in &summary.linked {
            ctx.events
                .record(EventKind::FunctionLinked)
                .function(name)
                .pass(self.name())
                .message(format!("from {}", library.name()));
        }
        for name in &summary.undefined {
            ctx.events
                .record(EventKind::Warning)
                .function(name)
                .pass(self.name())
                .message(format!("@{name} is declared but defined nowhere"));
        }
        if summary.internalized > 0 {
            ctx.events
                .record(EventKind::SymbolInternalized)
                .pass(self.name())
                .message(format!("{} symbols internalized", summary.internalized));
        }
        log::debug!(
            "linked {} functions, {} internalized, {} removed",
            summary.linked.len(),
            summary.internalized,
            summary.removed.len()
        );
        Ok(!summary.linked.is_empty() || summary.internalized > 0 || !summary.removed.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_set_by_version() {
        let v12 = builtin_functions(120);
        assert_eq!(v12.len(), 30);
        assert!(v12.contains(&"__gen_memcpy_pc_align".to_string()));
        assert!(v12.contains(&"__gen_memset_l".to_string()));
        assert!(!v12.contains(&"__gen_memcpy_gn".to_string()));

        let v20 = builtin_functions(200);
        assert_eq!(v20.len(), 48);
        assert!(v20.contains(&"__gen_memcpy_nn_align".to_string()));
        assert!(v20.contains(&"__gen_memset_n".to_string()));
    }
}
