//! INI serialization for `ConfigFile`.

use super::settings::ConfigFile;
use std::path::Path;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let s = &config.scheduler;

    format!(
        r#"[scheduler]
; Worker loop tick in milliseconds (default: 100, minimum: 10)
poll_interval_ms = {}
; Compiler scheduling:
;   serial - one compilation at a time
;   pooled - compilations run on a small fixed pool
compiler_strategy = {}
; Concurrent compilations for the pooled strategy (default: 2)
compiler_pool_size = {}
; Executor scheduling:
;   serial  - strictly one running script at a time
;   bounded - up to max_concurrent_runs scripts at a time
executor_strategy = {}
; Concurrency cap for the bounded strategy (default: 3)
max_concurrent_runs = {}
; Wait for an interrupted script before logging it as still alive (default: 5000)
interrupt_grace_ms = {}
; Bounded wait for worker loops on shutdown, in seconds (default: 10)
shutdown_timeout_secs = {}

[workspace]
; Base directory for matrices, settings and per-run working directories
root = {}

[logging]
; Log directory, relative paths resolve against the working directory
directory = {}
file = {}
"#,
        s.poll_interval_ms,
        s.compiler_strategy,
        s.compiler_pool_size,
        s.executor_strategy,
        s.max_concurrent_runs,
        s.interrupt_grace_ms,
        s.shutdown_timeout_secs,
        path_to_string(&config.workspace.root),
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
