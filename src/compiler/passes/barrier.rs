//! Barrier duplication control.
//!
//! Control-flow transformations that clone code (tail duplication, jump threading) must not
//! clone a work-group barrier: every work-item has to reach the same barrier instance. The
//! barrier functions carry the no-duplicate attribute while the always-inline step runs and
//! lose it again afterwards, so the backend is free to schedule around them.

use crate::{
    compiler::{EventKind, ModulePass, PassContext},
    ir::{FnAttributes, Module},
    Result,
};

/// Work-group barrier entry points of the builtin library.
pub const BARRIER_FUNCTIONS: [&str; 3] = [
    "__gen_ocl_barrier_local",
    "__gen_ocl_barrier_global",
    "__gen_ocl_barrier_local_and_global",
];

/// Adds or removes the no-duplicate attribute on the barrier functions.
pub struct BarrierDuplicationPass {
    no_duplicate: bool,
}

impl BarrierDuplicationPass {
    /// Creates the pass; `no_duplicate` selects whether the attribute is added or removed.
    #[must_use]
    pub fn new(no_duplicate: bool) -> Self {
        Self { no_duplicate }
    }
}

impl ModulePass for BarrierDuplicationPass {
    fn name(&self) -> &'static str {
        "barrier-nodup"
    }

    fn description(&self) -> &'static str {
        if self.no_duplicate {
            "Forbids duplication of barrier calls"
        } else {
            "Allows duplication of barrier calls again"
        }
    }

    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        let mut changed = false;
        for name in BARRIER_FUNCTIONS {
            let Some(func) = module.function_mut(name) else {
                continue;
            };
            if func.attrs.contains(FnAttributes::NO_DUPLICATE) == self.no_duplicate {
                continue;
            }
            func.attrs.set(FnAttributes::NO_DUPLICATE, self.no_duplicate);
            log::trace!("@{name}: no-duplicate = {}", self.no_duplicate);
            ctx.events
                .record(EventKind::BarrierToggled)
                .function(name)
                .pass(self.name())
                .message(if self.no_duplicate { "on" } else { "off" });
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        ir::{Function, Type},
        test::create_module,
    };

    #[test]
    fn test_toggle_on_and_off() {
        let mut module = create_module(
            120,
            vec![
                Function::new("__gen_ocl_barrier_local", vec![], Type::Void),
                Function::new("__gen_ocl_barrier_global", vec![], Type::Void),
                Function::new("unrelated", vec![], Type::Void),
            ],
        );
        let ctx = PassContext::new(PipelineConfig::default());

        let on = BarrierDuplicationPass::new(true);
        assert!(on.run_on_module(&mut module, &ctx).unwrap());
        assert!(!on.run_on_module(&mut module, &ctx).unwrap());
        for name in &BARRIER_FUNCTIONS[..2] {
            assert!(module
                .function(name)
                .unwrap()
                .attrs
                .contains(FnAttributes::NO_DUPLICATE));
        }
        assert!(module.function("unrelated").unwrap().attrs.is_empty());

        let off = BarrierDuplicationPass::new(false);
        assert!(off.run_on_module(&mut module, &ctx).unwrap());
        assert!(!off.run_on_module(&mut module, &ctx).unwrap());
        assert!(module.functions.iter().all(|f| f.attrs.is_empty()));
        assert_eq!(ctx.events.count_kind(EventKind::BarrierToggled), 4);
    }

    #[test]
    fn test_module_without_barriers() {
        let mut module = create_module(120, vec![]);
        let ctx = PassContext::new(PipelineConfig::default());
        assert!(!BarrierDuplicationPass::new(true)
            .run_on_module(&mut module, &ctx)
            .unwrap());
    }
}
