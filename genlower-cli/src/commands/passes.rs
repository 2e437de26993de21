use genlower::{compiler::Stage, Pipeline, PipelineConfig};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct StageInfo {
    pub order: usize,
    pub name: &'static str,
    pub scope: &'static str,
    pub description: &'static str,
}

pub fn run(library: bool, opts: &GlobalOptions) -> anyhow::Result<()> {
    let config = PipelineConfig {
        link: library,
        ..PipelineConfig::default()
    };
    let stages: Vec<StageInfo> = Pipeline::standard(&config)
        .stages()
        .iter()
        .enumerate()
        .map(|(i, stage)| StageInfo {
            order: i + 1,
            name: stage.name(),
            scope: match stage {
                Stage::Module(_) => "module",
                Stage::Function(_) => "function",
            },
            description: stage.description(),
        })
        .collect();

    print_output(&stages, opts, |stages| {
        let mut tw = TabWriter::new(vec![
            ("#", Align::Right),
            ("Stage", Align::Left),
            ("Scope", Align::Left),
            ("Description", Align::Left),
        ]);
        for s in stages {
            tw.row(vec![
                s.order.to_string(),
                s.name.to_string(),
                s.scope.to_string(),
                s.description.to_string(),
            ]);
        }
        tw.print();
    })
}
