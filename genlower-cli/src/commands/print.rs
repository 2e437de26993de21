use std::path::Path;

use genlower::ir::Module;
use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_module, output::print_output};

#[derive(Debug, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub kernel: bool,
    pub declaration: bool,
    pub params: usize,
    pub instructions: usize,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub ocl_version: u32,
    pub pointer_bits: u32,
    pub globals: Vec<String>,
    pub functions: Vec<FunctionInfo>,
}

fn describe(module: &Module, function: Option<&str>) -> ModuleInfo {
    ModuleInfo {
        name: module.name.clone(),
        ocl_version: module.ocl_version,
        pointer_bits: module.pointer_bits(),
        globals: module.globals.iter().map(|g| g.name.clone()).collect(),
        functions: module
            .functions
            .iter()
            .filter(|f| function.is_none_or(|name| f.name() == name))
            .map(|f| FunctionInfo {
                name: f.name().to_string(),
                kernel: module.is_kernel(f),
                declaration: f.is_declaration(),
                params: f.params().len(),
                instructions: f.live_insts().len(),
            })
            .collect(),
    }
}

pub fn run(path: &Path, function: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let module = load_module(path)?;
    if let Some(name) = function {
        if module.function(name).is_none() {
            anyhow::bail!("no function named '{name}' in {}", path.display());
        }
    }
    let info = describe(&module, function);

    print_output(&info, opts, |_| match function.and_then(|n| module.function(n)) {
        Some(func) => print!("{func}"),
        None => print!("{module}"),
    })
}
