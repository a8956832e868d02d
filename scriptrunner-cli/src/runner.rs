//! CLI runner for common setup.
//!
//! Loads configuration, initializes logging and builds the run registry so
//! command handlers stay small.

use crate::error::CliError;
use crate::matrix::CommandMatrixCompiler;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use scriptrunner::collaborators::{FileReportSink, FsWorkspace};
use scriptrunner::config::{config_directory, config_file_path, ConfigFile};
use scriptrunner::logging::{init_logging, LoggingGuard};
use scriptrunner::registry::{RunRegistry, TracingRunListener};
use scriptrunner::scheduler::SchedulerConfig;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// `config_path` overrides the default `~/.scriptrunner/config.ini`.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&path)?;

        // Relative log directories live next to the config file.
        let log_dir = if config.logging.directory.is_absolute() {
            config.logging.directory.clone()
        } else {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(config_directory)
                .join(&config.logging.directory)
        };
        let logging_guard = init_logging(&log_dir, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("ScriptRunner v{}", scriptrunner::VERSION);
        info!("ScriptRunner CLI: {} command", command);
    }

    /// Workspace root, unless overridden on the command line.
    pub fn workspace_root(&self, override_root: Option<PathBuf>) -> PathBuf {
        override_root.unwrap_or_else(|| self.config.workspace.root.clone())
    }

    /// Build a registry over the command-matrix compiler, writing reports
    /// into each run's working directory.
    pub fn create_registry(
        &self,
        scheduler: SchedulerConfig,
        workspace_root: &Path,
    ) -> RunRegistry {
        info!(
            workspace = %workspace_root.display(),
            compiler = %scheduler.compiler_strategy,
            executor = %scheduler.executor_strategy,
            "Creating run registry"
        );
        let registry = RunRegistry::new(
            scheduler,
            Arc::new(CommandMatrixCompiler::new()),
            Arc::new(FsWorkspace::new(workspace_root)),
            Arc::new(FileReportSink::new()),
        );
        registry.subscribe(Arc::new(TracingRunListener));
        registry
    }
}
