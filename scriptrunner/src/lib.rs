//! ScriptRunner - staged compile/run pipeline for matrix-driven test scripts
//!
//! Submitted runs move through staged queues: a compiler worker turns each
//! matrix into an executable artifact, and an executor worker runs the
//! artifacts while keeping concurrently running scripts off each other's
//! services.
//!
//! # High-Level API
//!
//! ```ignore
//! use scriptrunner::registry::RunRegistry;
//! use scriptrunner::run::RunParams;
//! use scriptrunner::scheduler::SchedulerConfig;
//!
//! let registry = RunRegistry::new(SchedulerConfig::default(), compiler, workspace, reports);
//! registry.start();
//!
//! let id = registry.submit(RunParams::builder("smoke/login.matrix").build())?;
//! let snapshot = registry.get(id);
//! ```

pub mod collaborators;
pub mod config;
pub mod debug;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod registry;
pub mod run;
pub mod scheduler;

/// Version of the ScriptRunner library and CLI.
///
/// The version is defined in the workspace `Cargo.toml` and injected at
/// compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
