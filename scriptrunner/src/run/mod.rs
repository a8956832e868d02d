//! Run descriptors and their vocabulary.
//!
//! A run moves through the staged queues as a shared [`RunDescriptor`]:
//!
//! ```text
//! submit ─→ Pending ─→ Preparing ─→ Ready ─→ Running ⇄ Paused ─→ Finished
//!                  (any non-terminal) ─────────────────────────→ Canceled
//! ```

mod descriptor;
mod id;
mod params;
mod state;

pub use descriptor::{RunDescriptor, RunLocation, RunSnapshot, CANCELED_CAUSE};
pub use id::{RunId, RunIdGenerator};
pub use params::{CaseRange, RangeParseError, RunParams, RunParamsBuilder, DEFAULT_ENCODING};
pub use state::{RunState, RunStatus};
