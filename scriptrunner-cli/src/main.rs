//! ScriptRunner CLI - Command-line interface
//!
//! Submits command matrices to the run pipeline and manages the
//! configuration file.

mod commands;
mod error;
mod matrix;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "scriptrunner")]
#[command(version = scriptrunner::VERSION)]
#[command(about = "Compile and run test command matrices", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.scriptrunner/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more command matrices
    Run(RunArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, config_path),
        Commands::Config { command } => commands::config::run(command, config_path),
    };

    if let Err(e) = result {
        e.exit();
    }
}
