//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.

use crate::scheduler::{CompilerStrategy, ExecutorStrategy};
use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub scheduler: SchedulerSettings,
    pub workspace: WorkspaceSettings,
    pub logging: LoggingSettings,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Worker loop tick in milliseconds.
    pub poll_interval_ms: u64,
    pub compiler_strategy: CompilerStrategy,
    /// Pool size for the pooled compiler strategy.
    pub compiler_pool_size: usize,
    pub executor_strategy: ExecutorStrategy,
    /// Concurrency cap for the bounded executor strategy.
    pub max_concurrent_runs: usize,
    /// Wait for an interrupted run before logging it as still alive.
    pub interrupt_grace_ms: u64,
    /// Bounded join for worker loops on shutdown.
    pub shutdown_timeout_secs: u64,
}

/// `[workspace]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSettings {
    /// Base directory holding matrices, settings and per-run folders.
    pub root: PathBuf,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
