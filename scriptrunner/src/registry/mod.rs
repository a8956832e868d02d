//! Run registry and its staged queues.
//!
//! The registry owns every [`RunDescriptor`](crate::run::RunDescriptor),
//! routes submissions into the staged queues and exposes the operator
//! commands (cancel, pause, resume, step). Every descriptor change is
//! broadcast to the subscribed [`RunListener`]s.

mod core;
mod listener;
mod queues;

pub use self::core::{RegistryError, RunRegistry};
pub use listener::{ListenerError, ListenerSet, NullRunListener, RunListener, TracingRunListener};
pub use queues::{QueueKind, RunQueues};
