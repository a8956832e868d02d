//! Default values for all configuration settings.

use super::settings::*;
use crate::scheduler::{
    CompilerStrategy, ExecutorStrategy, DEFAULT_COMPILER_POOL_SIZE, DEFAULT_INTERRUPT_GRACE_MS,
    DEFAULT_MAX_CONCURRENT_RUNS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use std::path::PathBuf;

/// Name of the per-user configuration directory under `$HOME`.
pub const CONFIG_DIR_NAME: &str = ".scriptrunner";

/// Configuration file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Workspace folder name inside [`CONFIG_DIR_NAME`].
pub const DEFAULT_WORKSPACE_DIR_NAME: &str = "workspace";

/// Default log directory, relative to the current directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "scriptrunner.log";

/// Default workspace root (`~/.scriptrunner/workspace`).
pub fn default_workspace_root() -> PathBuf {
    super::file::config_directory().join(DEFAULT_WORKSPACE_DIR_NAME)
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            compiler_strategy: CompilerStrategy::default(),
            compiler_pool_size: DEFAULT_COMPILER_POOL_SIZE,
            executor_strategy: ExecutorStrategy::default(),
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            interrupt_grace_ms: DEFAULT_INTERRUPT_GRACE_MS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIR),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            workspace: WorkspaceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
