//! Scheduler configuration.
//!
//! This module contains the [`SchedulerConfig`] struct and the constants the
//! compiler and executor workers fall back to.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default worker loop tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Smallest accepted worker loop tick.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Default number of concurrent compilations for the pooled strategy.
pub const DEFAULT_COMPILER_POOL_SIZE: usize = 2;

/// Default concurrency cap for the bounded executor strategy.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 3;

/// Default wait for an interrupted run before it is reported as still alive.
pub const DEFAULT_INTERRUPT_GRACE_MS: u64 = 5_000;

/// Default bounded join for each worker loop on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Default threshold after which a blocked admission is logged at `warn`.
pub const DEFAULT_ADMISSION_WARN_SECS: u64 = 60;

// =============================================================================
// Strategies
// =============================================================================

/// How the compiler worker schedules compilations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompilerStrategy {
    /// One compilation at a time, awaited by the loop itself.
    Serial,
    /// Compilations dispatched onto a small fixed pool.
    #[default]
    Pooled,
}

/// How the executor worker schedules executions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutorStrategy {
    /// Strictly one run at a time, supervised by the loop itself.
    Serial,
    /// Up to `max_concurrent_runs` runs at a time.
    #[default]
    Bounded,
}

/// Error for unrecognized strategy names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for CompilerStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "pooled" => Ok(Self::Pooled),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for CompilerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Pooled => write!(f, "pooled"),
        }
    }
}

impl FromStr for ExecutorStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "bounded" => Ok(Self::Bounded),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for ExecutorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Bounded => write!(f, "bounded"),
        }
    }
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Configuration for the compiler and executor workers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep between worker loop iterations.
    pub poll_interval: Duration,

    pub compiler_strategy: CompilerStrategy,

    /// Concurrent compilations for [`CompilerStrategy::Pooled`].
    pub compiler_pool_size: usize,

    pub executor_strategy: ExecutorStrategy,

    /// Concurrency cap for [`ExecutorStrategy::Bounded`].
    pub max_concurrent_runs: usize,

    /// Wait for an interrupted run before logging it as still alive.
    pub interrupt_grace: Duration,

    /// Bounded join for each worker loop on shutdown.
    pub shutdown_timeout: Duration,

    /// Blocked admissions older than this are logged at `warn`.
    pub admission_warn_after: Duration,
}

impl SchedulerConfig {
    /// Number of runs the executor may have in flight.
    pub fn execution_slots(&self) -> usize {
        match self.executor_strategy {
            ExecutorStrategy::Serial => 1,
            ExecutorStrategy::Bounded => self.max_concurrent_runs.max(1),
        }
    }

    /// Number of compilations the compiler may have in flight.
    pub fn compile_slots(&self) -> usize {
        match self.compiler_strategy {
            CompilerStrategy::Serial => 1,
            CompilerStrategy::Pooled => self.compiler_pool_size.max(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_compiler(mut self, strategy: CompilerStrategy) -> Self {
        self.compiler_strategy = strategy;
        self
    }

    pub fn with_executor(mut self, strategy: ExecutorStrategy) -> Self {
        self.executor_strategy = strategy;
        self
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            compiler_strategy: CompilerStrategy::default(),
            compiler_pool_size: DEFAULT_COMPILER_POOL_SIZE,
            executor_strategy: ExecutorStrategy::default(),
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            interrupt_grace: Duration::from_millis(DEFAULT_INTERRUPT_GRACE_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            admission_warn_after: Duration::from_secs(DEFAULT_ADMISSION_WARN_SECS),
        }
    }
}

impl From<&crate::config::SchedulerSettings> for SchedulerConfig {
    fn from(settings: &crate::config::SchedulerSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            compiler_strategy: settings.compiler_strategy,
            compiler_pool_size: settings.compiler_pool_size,
            executor_strategy: settings.executor_strategy,
            max_concurrent_runs: settings.max_concurrent_runs,
            interrupt_grace: Duration::from_millis(settings.interrupt_grace_ms),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.compiler_strategy, CompilerStrategy::Pooled);
        assert_eq!(config.compile_slots(), DEFAULT_COMPILER_POOL_SIZE);
        assert_eq!(config.execution_slots(), DEFAULT_MAX_CONCURRENT_RUNS);
    }

    #[test]
    fn test_serial_strategies_have_one_slot() {
        let config = SchedulerConfig::default()
            .with_compiler(CompilerStrategy::Serial)
            .with_executor(ExecutorStrategy::Serial)
            .with_max_concurrent_runs(8);
        assert_eq!(config.compile_slots(), 1);
        assert_eq!(config.execution_slots(), 1);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Serial".parse(), Ok(CompilerStrategy::Serial));
        assert_eq!(" pooled ".parse(), Ok(CompilerStrategy::Pooled));
        assert_eq!("bounded".parse(), Ok(ExecutorStrategy::Bounded));
        assert!("parallel".parse::<ExecutorStrategy>().is_err());
        assert_eq!(ExecutorStrategy::Serial.to_string(), "serial");
    }

    #[test]
    fn test_from_settings() {
        let mut settings = crate::config::SchedulerSettings::default();
        settings.poll_interval_ms = 25;
        settings.executor_strategy = ExecutorStrategy::Serial;
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.poll_interval, Duration::from_millis(25));
        assert_eq!(config.execution_slots(), 1);
    }
}
