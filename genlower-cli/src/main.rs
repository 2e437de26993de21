mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // genlower info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("genlower", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Lower {
            path,
            output,
            library,
            strict_math,
            no_link,
            unroll_ceiling,
        } => commands::lower::run(
            path,
            output.as_deref(),
            commands::lower::LowerOptions {
                library: library.clone(),
                strict_math: *strict_math,
                link: !*no_link,
                unroll_ceiling: *unroll_ceiling,
            },
            &cli.global,
        ),
        Command::Passes { library } => commands::passes::run(*library, &cli.global),
        Command::Print { path, function } => {
            commands::print::run(path, function.as_deref(), &cli.global)
        }
    }
}
