//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (init, show, path)
//! - [`run`] - Submit command matrices and wait for their runs

pub mod config;
pub mod run;
