//! The run descriptor: one concurrency-safe state machine per submitted run.
//!
//! All mutable fields sit behind a single reader/writer lock and change only
//! through the named `mark_*` transitions. Each transition releases the lock
//! before broadcasting a [`RunSnapshot`] to the registry's listeners, so a
//! listener may freely read the descriptor again.
//!
//! Terminal states (`Finished`, `Canceled`) refuse every further transition.
//! A refused transition still broadcasts.

use super::id::RunId;
use super::params::{CaseRange, RunParams};
use super::state::{RunState, RunStatus};
use crate::collaborators::CompiledArtifact;
use crate::debug::{DebugController, DebugListener, WAITING_FOR_START_REASON};
use crate::registry::ListenerSet;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cause recorded for runs canceled by an operator.
pub const CANCELED_CAUSE: &str = "canceled by user";

/// Files materialized for a run at submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLocation {
    /// Per-run working directory.
    pub work_folder: PathBuf,
    /// Matrix snapshot inside `work_folder`.
    pub matrix_file: PathBuf,
    /// Settings snapshot inside `work_folder`.
    pub settings_file: Option<PathBuf>,
}

/// Point-in-time copy of a descriptor, safe to hold after the lock is gone.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSnapshot {
    pub id: RunId,
    pub params: RunParams,
    pub work_folder: PathBuf,
    pub enqueued_at: DateTime<Utc>,
    pub state: RunState,
    pub status: RunStatus,
    pub cause: Option<String>,
    pub script_name: Option<String>,
    pub services: BTreeSet<String>,
    pub canceled: bool,
    pub locked: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub pause_timeout: Option<Duration>,
}

impl RunSnapshot {
    /// Snapshot of a freshly created descriptor.
    pub fn initial(id: RunId, params: RunParams, work_folder: PathBuf) -> Self {
        Self {
            id,
            params,
            work_folder,
            enqueued_at: Utc::now(),
            state: RunState::Initial,
            status: RunStatus::None,
            cause: None,
            script_name: None,
            services: BTreeSet::new(),
            canceled: false,
            locked: true,
            started_at: None,
            finished_at: None,
            pause_reason: None,
            pause_timeout: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug)]
struct RunFields {
    state: RunState,
    status: RunStatus,
    cause: Option<String>,
    artifact: Option<Arc<CompiledArtifact>>,
    script_name: Option<String>,
    services: BTreeSet<String>,
    canceled: bool,
    locked: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    pause_reason: Option<String>,
    pause_timeout: Option<Duration>,
}

impl Default for RunFields {
    fn default() -> Self {
        Self {
            state: RunState::Initial,
            status: RunStatus::None,
            cause: None,
            artifact: None,
            script_name: None,
            services: BTreeSet::new(),
            canceled: false,
            locked: true,
            started_at: None,
            finished_at: None,
            pause_reason: None,
            pause_timeout: None,
        }
    }
}

/// One submitted script run.
pub struct RunDescriptor {
    id: RunId,
    enqueued_at: DateTime<Utc>,
    params: RunParams,
    range: CaseRange,
    location: RunLocation,
    fields: RwLock<RunFields>,
    debug: Arc<DebugController>,
    cancellation: CancellationToken,
    listeners: Arc<ListenerSet>,
}

impl RunDescriptor {
    /// Creates a descriptor in the `Initial` state, locked until its report
    /// is closed.
    ///
    /// When `params.auto_start` is false the debug controller starts paused,
    /// holding the script at its first checkpoint.
    pub fn new(
        id: RunId,
        params: RunParams,
        range: CaseRange,
        location: RunLocation,
        listeners: Arc<ListenerSet>,
    ) -> Arc<Self> {
        let debug = if params.auto_start {
            DebugController::new()
        } else {
            DebugController::paused(WAITING_FOR_START_REASON)
        };

        Arc::new_cyclic(|weak: &Weak<RunDescriptor>| {
            debug.set_listener(Arc::new(DebugBridge(weak.clone())));
            Self {
                id,
                enqueued_at: Utc::now(),
                params,
                range,
                location,
                fields: RwLock::new(RunFields::default()),
                debug: Arc::new(debug),
                cancellation: CancellationToken::new(),
                listeners,
            }
        })
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn range(&self) -> &CaseRange {
        &self.range
    }

    pub fn work_folder(&self) -> &Path {
        &self.location.work_folder
    }

    pub fn matrix_file(&self) -> &Path {
        &self.location.matrix_file
    }

    pub fn settings_file(&self) -> Option<&Path> {
        self.location.settings_file.as_deref()
    }

    pub fn debug(&self) -> &Arc<DebugController> {
        &self.debug
    }

    /// Token cancelled when the run is canceled or interrupted. Compilation
    /// and execution both observe it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn state(&self) -> RunState {
        self.fields.read().state
    }

    pub fn status(&self) -> RunStatus {
        self.fields.read().status
    }

    pub fn cause(&self) -> Option<String> {
        self.fields.read().cause.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.fields.read().state.is_terminal()
    }

    pub fn is_canceled(&self) -> bool {
        self.fields.read().canceled
    }

    /// True until the run's report has been closed.
    pub fn is_locked(&self) -> bool {
        self.fields.read().locked
    }

    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.fields.read().artifact.clone()
    }

    /// Services the compiled script declared; empty before compilation.
    pub fn services(&self) -> BTreeSet<String> {
        self.fields.read().services.clone()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let f = self.fields.read();
        RunSnapshot {
            id: self.id,
            params: self.params.clone(),
            work_folder: self.location.work_folder.clone(),
            enqueued_at: self.enqueued_at,
            state: f.state,
            status: f.status,
            cause: f.cause.clone(),
            script_name: f.script_name.clone(),
            services: f.services.clone(),
            canceled: f.canceled,
            locked: f.locked,
            started_at: f.started_at,
            finished_at: f.finished_at,
            pause_reason: f.pause_reason.clone(),
            pause_timeout: f.pause_timeout,
        }
    }

    /// Broadcasts the current snapshot.
    pub fn notify(&self) {
        self.listeners.broadcast(&self.snapshot());
    }

    /// Applies `change` unless the run is terminal, then broadcasts either way.
    fn transition<F>(&self, name: &'static str, change: F) -> bool
    where
        F: FnOnce(&mut RunFields) -> bool,
    {
        let accepted = {
            let mut f = self.fields.write();
            !f.state.is_terminal() && change(&mut *f)
        };
        if !accepted {
            debug!(run_id = %self.id, transition = name, "Transition refused");
        }
        self.notify();
        accepted
    }

    /// Terminal transition. Releases the artifact after the lock is dropped.
    fn terminate(
        &self,
        name: &'static str,
        state: RunState,
        status: RunStatus,
        cause: Option<String>,
    ) -> bool {
        let mut released = None;
        let accepted = self.transition(name, |f| {
            f.state = state;
            f.status = status;
            if cause.is_some() {
                f.cause = cause;
            }
            f.finished_at = Some(Utc::now());
            f.pause_reason = None;
            f.pause_timeout = None;
            released = f.artifact.take();
            true
        });
        drop(released);
        accepted
    }

    /// Placed on a queue.
    pub fn mark_pending(&self) -> bool {
        self.transition("pending", |f| {
            f.state = RunState::Pending;
            true
        })
    }

    /// Picked up by the compiler worker.
    pub fn mark_preparing(&self) -> bool {
        self.transition("preparing", |f| {
            f.state = RunState::Preparing;
            true
        })
    }

    /// Compiled; the artifact stays attached until the run terminates.
    pub fn mark_ready(&self, artifact: Arc<CompiledArtifact>) -> bool {
        self.transition("ready", |f| {
            f.state = RunState::Ready;
            f.script_name = Some(artifact.script_name().to_string());
            f.services = artifact.services().clone();
            f.artifact = Some(artifact);
            true
        })
    }

    /// Admitted by the executor.
    pub fn mark_running(&self) -> bool {
        self.transition("running", |f| {
            f.state = RunState::Running;
            f.started_at = Some(Utc::now());
            true
        })
    }

    /// The script blocked at a checkpoint. Only valid while running.
    pub fn mark_paused(&self, reason: Option<String>, timeout: Option<Duration>) -> bool {
        self.transition("paused", |f| {
            if f.state != RunState::Running {
                return false;
            }
            f.state = RunState::Paused;
            f.pause_reason = reason;
            f.pause_timeout = timeout;
            true
        })
    }

    /// The script left a checkpoint. Only valid while paused.
    pub fn mark_resumed(&self) -> bool {
        self.transition("resumed", |f| {
            if f.state != RunState::Paused {
                return false;
            }
            f.state = RunState::Running;
            f.pause_reason = None;
            f.pause_timeout = None;
            true
        })
    }

    pub fn mark_finished(&self, status: RunStatus, cause: Option<String>) -> bool {
        self.terminate("finished", RunState::Finished, status, cause)
    }

    pub fn mark_canceled(&self, status: RunStatus, cause: Option<String>) -> bool {
        self.terminate("canceled", RunState::Canceled, status, cause)
    }

    /// Sets the cancel flag, stops the debug controller and fires the
    /// cancellation token.
    ///
    /// Returns false when the run is already terminal or already flagged.
    /// The flag is never cleared.
    pub fn request_cancel(&self) -> bool {
        let newly_set = {
            let mut f = self.fields.write();
            if f.state.is_terminal() || f.canceled {
                false
            } else {
                f.canceled = true;
                true
            }
        };
        if newly_set {
            self.debug.stop();
            self.cancellation.cancel();
            self.notify();
        }
        newly_set
    }

    /// Stops the debug controller and fires the cancellation token without
    /// flagging the run as canceled. Used when the pipeline shuts down.
    pub fn interrupt(&self) {
        self.debug.stop();
        self.cancellation.cancel();
    }

    /// Clears the lock flag once the report is closed.
    pub fn unlock(&self) {
        self.fields.write().locked = false;
        self.notify();
    }
}

impl std::fmt::Debug for RunDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.fields.read();
        f.debug_struct("RunDescriptor")
            .field("id", &self.id)
            .field("state", &fields.state)
            .field("status", &fields.status)
            .field("canceled", &fields.canceled)
            .field("locked", &fields.locked)
            .finish_non_exhaustive()
    }
}

/// Mirrors debug pauses onto the descriptor state.
struct DebugBridge(Weak<RunDescriptor>);

impl DebugListener for DebugBridge {
    fn on_paused(&self, reason: Option<&str>, timeout: Option<Duration>, description: &str) {
        if let Some(run) = self.0.upgrade() {
            debug!(run_id = %run.id, step = %description, "Script paused");
            run.mark_paused(reason.map(str::to_string), timeout);
        }
    }

    fn on_resumed(&self) {
        if let Some(run) = self.0.upgrade() {
            run.mark_resumed();
        }
    }
}
