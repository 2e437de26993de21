//! Calling convention and linkage normalization.
//!
//! Front-ends tag kernels and device functions with their own calling conventions. The
//! backend only knows the C convention, and every device function must end up inlined into
//! the kernels that call it.
//!
//! | Function                  | Calling convention | Linkage  | Attributes        |
//! |---------------------------|--------------------|----------|-------------------|
//! | kernel                    | C                  | external | unchanged         |
//! | non-kernel with a body    | C                  | internal | + always-inline   |
//! | declaration               | C                  | unchanged| unchanged         |
//!
//! Every call site gets the C convention as well.

use crate::{
    compiler::{EventKind, ModulePass, PassContext},
    ir::{CallConv, FnAttributes, Function, Linkage, Module, Op},
    Result,
};

/// Normalizes calling conventions, linkage and inlining attributes.
pub struct AttributeNormalizationPass;

impl Default for AttributeNormalizationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeNormalizationPass {
    /// Creates a new attribute normalization pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn normalize_call_sites(func: &mut Function) -> usize {
        let mut rewritten = 0;
        for id in func.live_insts() {
            if let Op::Call { conv, .. } = &mut func.inst_mut(id).op {
                if *conv != CallConv::C {
                    *conv = CallConv::C;
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    fn normalize_function(func: &mut Function, is_kernel: bool) -> bool {
        let mut changed = false;
        if func.call_conv != CallConv::C {
            func.call_conv = CallConv::C;
            changed = true;
        }
        if is_kernel {
            if func.linkage != Linkage::External {
                func.linkage = Linkage::External;
                changed = true;
            }
        } else if !func.is_declaration() {
            if !func.attrs.contains(FnAttributes::ALWAYS_INLINE) {
                func.attrs.insert(FnAttributes::ALWAYS_INLINE);
                changed = true;
            }
            if func.linkage != Linkage::Internal {
                func.linkage = Linkage::Internal;
                changed = true;
            }
        }
        changed | (Self::normalize_call_sites(func) > 0)
    }
}

impl ModulePass for AttributeNormalizationPass {
    fn name(&self) -> &'static str {
        "attribute-normalization"
    }

    fn description(&self) -> &'static str {
        "Uniform calling convention; device functions become internal and always-inline"
    }

    fn run_on_module(&self, module: &mut Module, ctx: &PassContext) -> Result<bool> {
        let kernels = module.kernel_names();
        let mut changed = false;
        for func in &mut module.functions {
            let is_kernel = kernels.iter().any(|k| k == func.name());
            if Self::normalize_function(func, is_kernel) {
                log::trace!("attributes of @{} normalized", func.name());
                ctx.events
                    .record(EventKind::AttributesNormalized)
                    .function(func.name())
                    .pass(self.name());
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::PipelineConfig,
        ir::{Param, Type, Value},
        test::{create_kernel, create_module, global_ptr},
    };

    fn sample_module() -> Module {
        let mut helper = Function::new("helper", vec![Param::new("x", Type::I32)], Type::I32);
        helper.call_conv = CallConv::SpirFunc;
        let entry = helper.add_block("entry");
        helper.build_at_end(entry).ret(Some(Value::Arg(0)));

        let mut kernel = create_kernel("k", vec![global_ptr("out")]);
        kernel.call_conv = CallConv::SpirKernel;
        kernel.linkage = Linkage::Internal;
        let entry = kernel.add_block("entry");
        let mut b = kernel.build_at_end(entry);
        let one = b.const_int(32, 1);
        let call = b.call("helper", vec![one], Type::I32);
        b.store(call, Value::Arg(0));
        b.ret(None);
        if let Some(id) = call.as_inst() {
            if let Op::Call { conv, .. } = &mut kernel.inst_mut(id).op {
                *conv = CallConv::SpirFunc;
            }
        }

        let decl = Function::new("external_fn", vec![], Type::Void);
        create_module(200, vec![helper, kernel, decl])
    }

    #[test]
    fn test_normalizes_kernels_and_helpers() {
        let mut module = sample_module();
        let ctx = PassContext::new(PipelineConfig::default());
        assert!(AttributeNormalizationPass::new()
            .run_on_module(&mut module, &ctx)
            .unwrap());

        let helper = module.function("helper").unwrap();
        assert_eq!(helper.call_conv, CallConv::C);
        assert_eq!(helper.linkage, Linkage::Internal);
        assert!(helper.attrs.contains(FnAttributes::ALWAYS_INLINE));

        let kernel = module.function("k").unwrap();
        assert_eq!(kernel.call_conv, CallConv::C);
        assert_eq!(kernel.linkage, Linkage::External);
        assert!(!kernel.attrs.contains(FnAttributes::ALWAYS_INLINE));
        assert!(kernel.live_insts().iter().all(|id| match &kernel.inst(*id).op {
            Op::Call { conv, .. } => *conv == CallConv::C,
            _ => true,
        }));

        let decl = module.function("external_fn").unwrap();
        assert_eq!(decl.linkage, Linkage::External);
        assert!(decl.attrs.is_empty());
        assert_eq!(ctx.events.count_kind(EventKind::AttributesNormalized), 2);
    }

    #[test]
    fn test_second_run_reports_no_change() {
        let mut module = sample_module();
        let ctx = PassContext::new(PipelineConfig::default());
        let pass = AttributeNormalizationPass::new();
        assert!(pass.run_on_module(&mut module, &ctx).unwrap());
        let snapshot = module.clone();
        assert!(!pass.run_on_module(&mut module, &ctx).unwrap());
        assert_eq!(module, snapshot);
    }
}
