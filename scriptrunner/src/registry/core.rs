//! The run registry: submission, operator commands and worker lifecycle.

use super::listener::{ListenerSet, RunListener};
use super::queues::QueueKind;
use crate::collaborators::{FolderKind, ReportSink, ScriptCompiler, Workspace, WorkspaceError};
use crate::run::{
    RangeParseError, RunDescriptor, RunId, RunIdGenerator, RunLocation, RunParams, RunSnapshot,
    RunStatus,
};
use crate::scheduler::{
    CompilerWorker, ExecutorWorker, Pipeline, RunEnd, SchedulerConfig, StallWatchdog,
    SHUTDOWN_INTERRUPTED_CAUSE, SHUTDOWN_NOT_STARTED_CAUSE,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid run parameters: {0}")]
    InvalidParams(#[from] RangeParseError),

    #[error("workspace setup failed: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("run {id} is not waiting in the {queue} queue")]
    NotInQueue { id: RunId, queue: QueueKind },

    #[error("registry is shut down")]
    ShutDown,
}

/// Owns every run descriptor and the staged queues, and drives the worker
/// loops that move runs through them.
///
/// # Example
///
/// ```ignore
/// let registry = RunRegistry::new(config, compiler, workspace, reports);
/// registry.start();
///
/// let id = registry.submit(RunParams::builder("smoke/login.matrix").build())?;
/// registry.pause(id)?;
/// registry.resume(id)?;
///
/// registry.shutdown().await;
/// ```
pub struct RunRegistry {
    pipeline: Arc<Pipeline>,
    ids: RunIdGenerator,
    listeners: Arc<ListenerSet>,
    workspace: Arc<dyn Workspace>,
    workers: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl RunRegistry {
    pub fn new(
        config: SchedulerConfig,
        compiler: Arc<dyn ScriptCompiler>,
        workspace: Arc<dyn Workspace>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(config, compiler, reports)),
            ids: RunIdGenerator::new(),
            listeners: Arc::new(ListenerSet::new()),
            workspace,
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Spawns the compiler, executor and watchdog loops on the current
    /// tokio runtime. Returns false if they were already started.
    pub fn start(&self) -> bool {
        if self.pipeline.is_shutting_down() || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let compiler = CompilerWorker::new(Arc::clone(&self.pipeline));
        let executor = ExecutorWorker::new(Arc::clone(&self.pipeline));
        let watchdog = StallWatchdog::new(
            Arc::clone(&self.pipeline.activity),
            Arc::clone(&self.pipeline.queues),
        );

        let mut workers = self.workers.lock();
        workers.push(("compiler", tokio::spawn(compiler.run(self.shutdown.clone()))));
        workers.push(("executor", tokio::spawn(executor.run(self.shutdown.clone()))));
        workers.push(("watchdog", tokio::spawn(watchdog.run(self.shutdown.clone()))));

        info!(
            compiler = %self.pipeline.config.compiler_strategy,
            executor = %self.pipeline.config.executor_strategy,
            "Run registry started"
        );
        true
    }

    /// Registers a listener for every descriptor change.
    pub fn subscribe(&self, listener: Arc<dyn RunListener>) {
        self.listeners.add(listener);
    }

    /// Submits a run.
    ///
    /// Materializes the run's working directory, copies the matrix (and
    /// settings, if any) into it and queues the run. Auto-run submissions go
    /// straight to the prepare queue; others wait in pending-prepare for
    /// [`compile_script`](Self::compile_script).
    ///
    /// Workspace failures abort the submission; no run is created.
    pub fn submit(&self, params: RunParams) -> Result<RunId, RegistryError> {
        if self.pipeline.is_shutting_down() {
            return Err(RegistryError::ShutDown);
        }
        let range = params.case_range()?;

        let matrix_source = self
            .workspace
            .resolve(FolderKind::Matrices, &params.matrix_path)?;
        let settings_source = params
            .settings_path
            .as_deref()
            .map(|path| self.workspace.resolve(FolderKind::Settings, path))
            .transpose()?;

        let id = self.ids.next_id();
        let mut relative = PathBuf::from(params.matrix_name());
        if let Some(sub_folder) = &params.sub_folder {
            relative.push(sub_folder);
        }
        relative.push(format!("run-{id}"));
        let work_folder = self.workspace.create_folder(FolderKind::Reports, &relative)?;

        let location =
            match self.materialize(&work_folder, &matrix_source, settings_source.as_deref()) {
                Ok(location) => location,
                Err(e) => {
                    if let Err(cleanup) = self.workspace.delete_folder(&work_folder) {
                        warn!(
                            path = %work_folder.display(),
                            error = %cleanup,
                            "Failed to clean up working directory"
                        );
                    }
                    return Err(e.into());
                }
            };

        let queue = if params.auto_run {
            QueueKind::Prepare
        } else {
            QueueKind::PendingPrepare
        };
        let run = RunDescriptor::new(id, params, range, location, Arc::clone(&self.listeners));
        self.pipeline.runs.insert(id, Arc::clone(&run));
        run.mark_pending();
        self.pipeline.queues.push_back(queue, id);

        info!(
            run_id = %id,
            matrix = %run.matrix_file().display(),
            queue = %queue,
            "Run submitted"
        );
        Ok(id)
    }

    fn materialize(
        &self,
        work_folder: &Path,
        matrix: &Path,
        settings: Option<&Path>,
    ) -> Result<RunLocation, WorkspaceError> {
        let matrix_file = self.workspace.copy_into(matrix, work_folder)?;
        let settings_file = settings
            .map(|path| self.workspace.copy_into(path, work_folder))
            .transpose()?;
        Ok(RunLocation {
            work_folder: work_folder.to_path_buf(),
            matrix_file,
            settings_file,
        })
    }

    fn require(&self, id: RunId) -> Result<Arc<RunDescriptor>, RegistryError> {
        self.pipeline
            .descriptor(id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Cancels a run.
    ///
    /// Queued runs are promoted to the front of the queue their worker
    /// drains, so they are finalized on its next tick. Running runs are
    /// interrupted. Returns false if the run was already terminal or
    /// already canceled.
    pub fn cancel(&self, id: RunId) -> Result<bool, RegistryError> {
        let run = self.require(id)?;
        if !run.request_cancel() {
            debug!(run_id = %id, "Cancel ignored");
            return Ok(false);
        }
        match self.pipeline.queues.promote(id) {
            Some(queue) => info!(run_id = %id, queue = %queue, "Run canceled, promoted"),
            None => info!(run_id = %id, state = %run.state(), "Run canceled"),
        }
        Ok(true)
    }

    /// Pauses a running script at its next checkpoint.
    pub fn pause(&self, id: RunId) -> Result<bool, RegistryError> {
        self.debug_command(id, "pause", |run| run.debug().pause())
    }

    /// Resumes a paused script.
    pub fn resume(&self, id: RunId) -> Result<bool, RegistryError> {
        self.debug_command(id, "resume", |run| run.debug().resume())
    }

    /// Lets a paused script past one checkpoint.
    pub fn step(&self, id: RunId) -> Result<bool, RegistryError> {
        self.debug_command(id, "step", |run| run.debug().step_next())
    }

    fn debug_command(
        &self,
        id: RunId,
        command: &'static str,
        apply: impl FnOnce(&RunDescriptor) -> bool,
    ) -> Result<bool, RegistryError> {
        let run = self.require(id)?;
        if !run.is_locked() || !run.state().is_executing() {
            debug!(run_id = %id, command, state = %run.state(), "Run not executing");
            return Ok(false);
        }
        let applied = apply(&run);
        debug!(run_id = %id, command, applied, "Debug command");
        run.notify();
        Ok(applied)
    }

    /// Moves a run from pending-prepare to the prepare queue.
    pub fn compile_script(&self, id: RunId) -> Result<(), RegistryError> {
        self.advance(id, QueueKind::PendingPrepare, QueueKind::Prepare)
    }

    /// Moves a compiled run from pending-run to the ready-run queue.
    pub fn run_compiled_script(&self, id: RunId) -> Result<(), RegistryError> {
        self.advance(id, QueueKind::PendingRun, QueueKind::ReadyRun)
    }

    fn advance(&self, id: RunId, from: QueueKind, to: QueueKind) -> Result<(), RegistryError> {
        let run = self.require(id)?;
        if !self.pipeline.queues.transfer(from, to, id) {
            return Err(RegistryError::NotInQueue { id, queue: from });
        }
        if run.is_canceled() {
            self.pipeline.queues.promote(id);
        }
        info!(run_id = %id, from = %from, to = %to, "Run advanced");
        run.notify();
        Ok(())
    }

    /// Snapshots of every registered run, ordered by id.
    pub fn list_runs(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = self
            .pipeline
            .runs
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        runs.sort_by_key(|run| run.id);
        runs
    }

    pub fn get(&self, id: RunId) -> Option<RunSnapshot> {
        self.pipeline.descriptor(id).map(|run| run.snapshot())
    }

    pub fn descriptor(&self, id: RunId) -> Option<Arc<RunDescriptor>> {
        self.pipeline.descriptor(id)
    }

    /// Ordered ids waiting in one queue.
    pub fn queue_snapshot(&self, kind: QueueKind) -> Vec<RunId> {
        self.pipeline.queues.snapshot(kind)
    }

    /// Removes unlocked runs, optionally deleting their working directories.
    ///
    /// Returns the ids that were not removed: unknown runs and runs whose
    /// report is still open.
    pub fn remove_runs(&self, ids: &[RunId], delete_on_disk: bool) -> Vec<RunId> {
        let mut skipped = Vec::new();
        for &id in ids {
            let Some((_, run)) = self.pipeline.runs.remove_if(&id, |_, run| !run.is_locked())
            else {
                debug!(run_id = %id, "Run locked or unknown, not removed");
                skipped.push(id);
                continue;
            };
            if delete_on_disk {
                if let Err(e) = self.workspace.delete_folder(run.work_folder()) {
                    warn!(run_id = %id, error = %e, "Failed to delete working directory");
                }
            }
            info!(run_id = %id, delete_on_disk, "Run removed");
        }
        skipped
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stops the worker loops and finalizes every run left behind.
    ///
    /// Running scripts are interrupted, and each worker is joined within
    /// the configured shutdown timeout. Queued runs end as not started.
    pub async fn shutdown(&self) {
        if !self.pipeline.begin_shutdown() {
            return;
        }
        info!("Run registry shutting down");
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = tokio::time::Instant::now() + self.pipeline.config.shutdown_timeout;
        for (name, mut handle) in workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(worker = name, "Worker joined"),
                Ok(Err(e)) => warn!(worker = name, error = %e, "Worker task failed"),
                Err(_) => {
                    warn!(worker = name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let queued = self.pipeline.queues.drain_all();
        for id in &queued {
            if let Some(run) = self.pipeline.descriptor(*id) {
                self.pipeline.finalize(
                    &run,
                    RunEnd::canceled(RunStatus::NotStarted, SHUTDOWN_NOT_STARTED_CAUSE),
                    false,
                    &[],
                );
            }
        }

        // Runs orphaned by an aborted worker.
        let leftovers: Vec<Arc<RunDescriptor>> = self
            .pipeline
            .runs
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for run in leftovers {
            run.interrupt();
            let end = if run.state().is_executing() {
                RunEnd::canceled(RunStatus::Interrupted, SHUTDOWN_INTERRUPTED_CAUSE)
            } else {
                RunEnd::canceled(RunStatus::NotStarted, SHUTDOWN_NOT_STARTED_CAUSE)
            };
            self.pipeline.finalize(&run, end, false, &[]);
        }

        self.disposed.store(true, Ordering::SeqCst);
        info!(discarded = queued.len(), "Run registry shut down");
    }
}

impl Drop for RunRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("pipeline", &self.pipeline)
            .field("listeners", &self.listeners.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
