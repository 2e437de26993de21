use std::path::Path;

use anyhow::Context;
use genlower::ir::Module;

/// Load a kernel module from its JSON form.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    Module::load(path).with_context(|| format!("failed to load module: {}", path.display()))
}
