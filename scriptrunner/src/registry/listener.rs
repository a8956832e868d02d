//! Run lifecycle listeners.
//!
//! Every descriptor mutation ends with a broadcast of a fresh [`RunSnapshot`]
//! to the registered listeners. The pipeline only emits; listeners decide how
//! to present (push to a UI, log, persist).
//!
//! # Example
//!
//! ```ignore
//! use scriptrunner::registry::{ListenerError, RunListener};
//! use scriptrunner::run::RunSnapshot;
//!
//! struct Printer;
//!
//! impl RunListener for Printer {
//!     fn on_run_event(&self, run: &RunSnapshot) -> Result<(), ListenerError> {
//!         println!("{} {}", run.id, run.state);
//!         Ok(())
//!     }
//! }
//! ```

use crate::run::RunSnapshot;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Error type returned by listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Listener Trait
// =============================================================================

/// Receives a snapshot after every run mutation.
///
/// Called on whichever thread performed the mutation, including worker
/// loops. Implementations must be fast and must not block; errors and
/// panics are logged and swallowed.
pub trait RunListener: Send + Sync {
    fn on_run_event(&self, run: &RunSnapshot) -> Result<(), ListenerError>;
}

// =============================================================================
// Built-in Listeners
// =============================================================================

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunListener;

impl RunListener for NullRunListener {
    fn on_run_event(&self, _run: &RunSnapshot) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Listener that logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunListener;

impl RunListener for TracingRunListener {
    fn on_run_event(&self, run: &RunSnapshot) -> Result<(), ListenerError> {
        tracing::debug!(
            run_id = %run.id,
            state = %run.state,
            status = %run.status,
            canceled = run.canceled,
            locked = run.locked,
            "Run updated"
        );
        Ok(())
    }
}

// =============================================================================
// Broadcast
// =============================================================================

/// Ordered set of listeners with per-listener failure isolation.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn RunListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener. Listeners are invoked in registration order.
    pub fn add(&self, listener: Arc<dyn RunListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Delivers `run` to every listener.
    pub fn broadcast(&self, run: &RunSnapshot) {
        // Clone the list so a listener may subscribe another without deadlocking.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_run_event(run))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(run_id = %run.id, error = %e, "Run listener failed");
                }
                Err(_) => {
                    warn!(run_id = %run.id, "Run listener panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listener_count", &self.len())
            .finish()
    }
}
