use std::path::Path;

use anyhow::Context;
use genlower::{Pipeline, PipelineConfig};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

pub struct LowerOptions {
    pub library: Option<String>,
    pub strict_math: bool,
    pub link: bool,
    pub unroll_ceiling: u64,
}

#[derive(Debug, Serialize)]
pub struct LowerSummary {
    pub module: String,
    pub ocl_version: u32,
    pub kernels: Vec<String>,
    pub functions: usize,
    pub changed: Vec<&'static str>,
    pub transformations: usize,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

pub fn run(
    path: &Path,
    output: Option<&Path>,
    options: LowerOptions,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut module = load_module(path)?;
    let config = PipelineConfig {
        library_path: options.library,
        strict_math: options.strict_math,
        link: options.link,
        unroll_ceiling: options.unroll_ceiling,
    };

    let report = Pipeline::standard(&config)
        .run(&mut module)
        .with_context(|| format!("lowering failed: {}", path.display()))?;
    log::info!("{}: {}", module.name, report.events.summary());
    for warning in report.events.warnings() {
        log::warn!("{warning}");
    }

    if let Some(out) = output {
        module
            .save(out)
            .with_context(|| format!("failed to write module: {}", out.display()))?;
    }

    let summary = LowerSummary {
        module: module.name.clone(),
        ocl_version: module.ocl_version,
        kernels: module.kernel_names(),
        functions: module.functions.len(),
        changed: report.changed.clone(),
        transformations: report.events.transformation_count(),
        events: report.events.transformations().map(ToString::to_string).collect(),
        warnings: report.events.warnings().map(ToString::to_string).collect(),
        output: output.map(|p| p.display().to_string()),
    };

    print_output(&summary, opts, |s| {
        if s.output.is_none() {
            print!("{module}");
            return;
        }
        println!("Module:          {} (OpenCL {})", s.module, s.ocl_version);
        println!("Kernels:         {}", s.kernels.join(", "));
        println!("Functions:       {}", s.functions);
        println!("Transformations: {}", s.transformations);
        if !s.warnings.is_empty() {
            println!("Warnings:        {}", s.warnings.len());
        }
        println!();
        let mut tw = TabWriter::new(vec![("Stage", Align::Left), ("Events", Align::Right)]);
        for stage in &s.changed {
            let count = report
                .events
                .transformations()
                .filter(|e| e.pass.as_deref() == Some(*stage))
                .count();
            tw.row(vec![(*stage).to_string(), count.to_string()]);
        }
        tw.print();
    })
}
