//! Ember command-line tool
//!
//! Runs, disassembles and verifies serialized closures produced by an
//! Ember compiler or by `Vm::save_closure`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Ember virtual machine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log interpreter and collector activity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a serialized closure with the base library installed
    Run {
        /// Closure file
        file: PathBuf,
        /// String arguments passed to the closure
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Print the disassembly of a serialized closure
    Disasm {
        /// Closure file
        file: PathBuf,
    },

    /// Decode and verify a serialized closure
    Verify {
        /// Closure file
        file: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run { file, args } => commands::run::execute(&file, &args),
        Commands::Disasm { file } => commands::disasm::execute(&file),
        Commands::Verify { file } => commands::verify::execute(&file),
    }
}
