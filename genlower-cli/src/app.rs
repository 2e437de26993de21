use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// genlower - legalize and lower GPU kernel modules for the Gen backend
#[derive(Debug, Parser)]
#[command(name = "genlower", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the lowering pipeline on a module and write the result.
    Lower {
        /// Path to the kernel module (JSON).
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Write the lowered module here instead of printing it.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Colon-separated library search path (default: $GENLOWER_LIBRARY_PATH).
        #[arg(short = 'L', long, value_name = "PATHS")]
        library: Option<String>,

        /// Clear the library's fast math flag.
        #[arg(long)]
        strict_math: bool,

        /// Stop before linking against the library.
        #[arg(long)]
        no_link: bool,

        /// Largest loop nest trip count product that may be force-unrolled.
        #[arg(long, value_name = "N", default_value_t = genlower::compiler::DEFAULT_UNROLL_CEILING)]
        unroll_ceiling: u64,
    },

    /// List the stages of the standard pipeline in execution order.
    Passes {
        /// Include the library link stage.
        #[arg(long)]
        library: bool,
    },

    /// Print a module, or one of its functions, in textual form.
    Print {
        /// Path to the kernel module (JSON).
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Print only this function.
        #[arg(short, long)]
        function: Option<String>,
    },
}
