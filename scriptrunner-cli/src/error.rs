//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;
use scriptrunner::config::ConfigFileError;
use scriptrunner::registry::RegistryError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// A matrix given on the command line could not be found
    Matrix { path: PathBuf, error: std::io::Error },
    /// The registry refused a submission
    Submit { path: PathBuf, error: RegistryError },
    /// Some runs did not execute cleanly
    RunsFailed { failed: usize, total: usize },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Submit {
                error: RegistryError::Workspace(_),
                ..
            } => {
                eprintln!();
                eprintln!("Check that the workspace root in config.ini is writable:");
                eprintln!("  scriptrunner config show");
            }
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Recreate a default configuration with:");
                eprintln!("  scriptrunner config init --force");
            }
            _ => {}
        }

        match self {
            CliError::RunsFailed { .. } => process::exit(2),
            _ => process::exit(1),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Matrix { path, error } => {
                write!(f, "Cannot read matrix '{}': {}", path.display(), error)
            }
            CliError::Submit { path, error } => {
                write!(f, "Failed to submit '{}': {}", path.display(), error)
            }
            CliError::RunsFailed { failed, total } => {
                write!(f, "{} of {} runs did not execute cleanly", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Runtime(e) => Some(e),
            CliError::Matrix { error, .. } => Some(error),
            CliError::Submit { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}
