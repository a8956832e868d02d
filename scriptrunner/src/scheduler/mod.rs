//! Worker loops draining the staged queues.
//!
//! ```text
//! ┌──────────────┐   prepare    ┌─────────────────┐   ready-run   ┌─────────────────┐
//! │ RunRegistry  │ ───────────→ │ CompilerWorker  │ ────────────→ │ ExecutorWorker  │
//! │  (submit)    │              │ serial | pooled │               │ serial | bounded│
//! └──────────────┘              └─────────────────┘               └─────────────────┘
//!        │                               │                                 │
//!        └──────────── Pipeline (runs, queues, reports, config) ───────────┘
//! ```
//!
//! Both loops tick on a fixed poll interval and stop when the shared
//! shutdown token fires. A [`StallWatchdog`] warns when queued runs stop
//! moving.

mod compiler_worker;
mod config;
mod executor_worker;
mod locks;
mod pipeline;
mod watchdog;

// Worker loops
pub use compiler_worker::CompilerWorker;
pub use executor_worker::ExecutorWorker;

// Admission
pub use locks::ServiceLockSet;

// Configuration
pub use config::{
    CompilerStrategy, ExecutorStrategy, SchedulerConfig, UnknownStrategy,
    DEFAULT_ADMISSION_WARN_SECS, DEFAULT_COMPILER_POOL_SIZE, DEFAULT_INTERRUPT_GRACE_MS,
    DEFAULT_MAX_CONCURRENT_RUNS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    MIN_POLL_INTERVAL_MS,
};

// Health
pub use watchdog::{
    ActivityClock, StallWatchdog, STALL_DETECTION_THRESHOLD_MS, STALL_WATCHDOG_INTERVAL_SECS,
};

// Finalization
pub use pipeline::{SHUTDOWN_INTERRUPTED_CAUSE, SHUTDOWN_NOT_STARTED_CAUSE};
pub(crate) use pipeline::{Pipeline, RunEnd};
