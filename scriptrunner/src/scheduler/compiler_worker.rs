//! Compiler worker: drains the prepare queue into compiled artifacts.
//!
//! Two strategies share the same routing:
//! - **Serial**: the loop pops one run per tick and awaits its compilation.
//! - **Pooled**: each tick first routes finished compilations from the
//!   result channel, then dispatches queued runs while pool permits remain.
//!
//! Compilation itself runs on the blocking thread pool.

use super::config::CompilerStrategy;
use super::pipeline::{Pipeline, RunEnd, SHUTDOWN_NOT_STARTED_CAUSE};
use crate::collaborators::{CompileError, CompileRequest, CompiledArtifact};
use crate::error::root_cause_message;
use crate::registry::QueueKind;
use crate::run::{RunDescriptor, RunId, RunStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type CompileResult = Result<CompiledArtifact, CompileError>;

/// A finished compilation on its way back to the loop.
struct CompileOutcome {
    id: RunId,
    result: CompileResult,
}

fn flatten(joined: Result<CompileResult, JoinError>) -> CompileResult {
    joined.unwrap_or_else(|e| {
        Err(CompileError::Other {
            message: "compiler task failed".to_string(),
            source: Some(Box::new(e)),
        })
    })
}

/// Background loop turning queued runs into compiled artifacts.
pub struct CompilerWorker {
    pipeline: Arc<Pipeline>,
    strategy: CompilerStrategy,
    pool: Arc<Semaphore>,
    in_flight: HashMap<RunId, Arc<RunDescriptor>>,
    results_tx: mpsc::UnboundedSender<CompileOutcome>,
    results_rx: mpsc::UnboundedReceiver<CompileOutcome>,
}

impl CompilerWorker {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        let strategy = pipeline.config.compiler_strategy;
        let pool = Arc::new(Semaphore::new(pipeline.config.compile_slots()));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            pipeline,
            strategy,
            pool,
            in_flight: HashMap::new(),
            results_tx,
            results_rx,
        }
    }

    /// Runs the loop until `shutdown` fires, then settles in-flight work.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            strategy = %self.strategy,
            slots = self.pipeline.config.compile_slots(),
            "Compiler worker started"
        );

        let mut ticker = tokio::time::interval(self.pipeline.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.strategy {
                CompilerStrategy::Serial => self.tick_serial(&shutdown).await,
                CompilerStrategy::Pooled => self.tick_pooled(),
            }
            self.pipeline.activity.touch();
        }

        self.shutdown().await;
        info!("Compiler worker stopped");
    }

    /// Dequeues `id` for compilation.
    ///
    /// Canceled runs are finalized here instead of compiled.
    fn begin(&self, id: RunId) -> Option<Arc<RunDescriptor>> {
        let Some(run) = self.pipeline.descriptor(id) else {
            debug!(run_id = %id, "Queued run no longer registered");
            return None;
        };
        if run.is_terminal() {
            return None;
        }
        if run.is_canceled() {
            info!(run_id = %id, "Run canceled before preparation");
            self.pipeline
                .finalize(&run, RunEnd::canceled_by_user(), false, &[]);
            return None;
        }
        run.mark_preparing();
        debug!(run_id = %id, matrix = %run.matrix_file().display(), "Preparing run");
        Some(run)
    }

    fn spawn_compile(
        &self,
        run: &RunDescriptor,
        permit: Option<OwnedSemaphorePermit>,
    ) -> JoinHandle<CompileResult> {
        let compiler = Arc::clone(&self.pipeline.compiler);
        let cancel = run.cancellation().clone();
        let request = CompileRequest {
            run_id: run.id(),
            matrix_file: run.matrix_file().to_path_buf(),
            settings_file: run.settings_file().map(|p| p.to_path_buf()),
            work_folder: run.work_folder().to_path_buf(),
            params: run.params().clone(),
        };
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            compiler.compile(&request, &cancel)
        })
    }

    async fn tick_serial(&mut self, shutdown: &CancellationToken) {
        let Some(id) = self.pipeline.queues.pop_front(QueueKind::Prepare) else {
            return;
        };
        let Some(run) = self.begin(id) else {
            return;
        };

        let mut handle = self.spawn_compile(&run, None);
        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = shutdown.cancelled() => None,
        };
        let joined = match joined {
            Some(joined) => Some(joined),
            None => {
                run.interrupt();
                tokio::time::timeout(self.pipeline.config.interrupt_grace, handle)
                    .await
                    .ok()
            }
        };

        match joined {
            Some(joined) => self.route(&run, flatten(joined)),
            None => self.abandon(&run),
        }
    }

    fn tick_pooled(&mut self) {
        while let Ok(outcome) = self.results_rx.try_recv() {
            self.complete(outcome);
        }

        loop {
            let Ok(permit) = Arc::clone(&self.pool).try_acquire_owned() else {
                break;
            };
            let Some(id) = self.pipeline.queues.pop_front(QueueKind::Prepare) else {
                break;
            };
            let Some(run) = self.begin(id) else {
                continue;
            };

            let handle = self.spawn_compile(&run, Some(permit));
            let tx = self.results_tx.clone();
            tokio::spawn(async move {
                let result = flatten(handle.await);
                let _ = tx.send(CompileOutcome { id, result });
            });
            self.in_flight.insert(id, run);
        }
    }

    fn complete(&mut self, outcome: CompileOutcome) {
        if let Some(run) = self.in_flight.remove(&outcome.id) {
            self.route(&run, outcome.result);
        }
    }

    /// Routes a finished compilation onward or finalizes the run.
    fn route(&self, run: &Arc<RunDescriptor>, result: CompileResult) {
        let id = run.id();

        if self.pipeline.is_shutting_down() {
            drop(result);
            self.pipeline.finalize(
                run,
                RunEnd::canceled(RunStatus::NotStarted, SHUTDOWN_NOT_STARTED_CAUSE),
                false,
                &[],
            );
            return;
        }

        match result {
            Ok(artifact) if run.is_canceled() => {
                drop(artifact);
                info!(run_id = %id, "Run canceled during preparation");
                self.pipeline
                    .finalize(run, RunEnd::canceled_by_user(), false, &[]);
            }
            Ok(artifact) => {
                let target = if run.params().auto_run {
                    QueueKind::ReadyRun
                } else {
                    QueueKind::PendingRun
                };
                info!(
                    run_id = %id,
                    script = %artifact.script_name(),
                    services = ?artifact.services(),
                    queue = %target,
                    "Run compiled"
                );
                run.mark_ready(Arc::new(artifact));
                self.pipeline.queues.push_back(target, id);
                // A cancel that landed while the run was between queues.
                if run.is_canceled() {
                    self.pipeline.queues.promote(id);
                }
            }
            Err(e) if e.is_canceled() || run.is_canceled() => {
                info!(run_id = %id, "Run canceled during preparation");
                self.pipeline
                    .finalize(run, RunEnd::canceled_by_user(), false, &[]);
            }
            Err(e) => {
                let cause = root_cause_message(&e);
                error!(run_id = %id, error = %e, cause = %cause, "Run preparation failed");
                self.pipeline.finalize(
                    run,
                    RunEnd::finished(RunStatus::InitFailed, Some(cause)),
                    false,
                    &[],
                );
            }
        }
    }

    fn abandon(&self, run: &RunDescriptor) {
        warn!(
            run_id = %run.id(),
            grace_ms = self.pipeline.config.interrupt_grace.as_millis() as u64,
            "Compilation still alive after interrupt"
        );
        self.pipeline.finalize(
            run,
            RunEnd::canceled(RunStatus::NotStarted, SHUTDOWN_NOT_STARTED_CAUSE),
            false,
            &[],
        );
    }

    async fn shutdown(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!(in_flight = self.in_flight.len(), "Interrupting compilations");
        for run in self.in_flight.values() {
            run.interrupt();
        }

        let deadline = tokio::time::Instant::now() + self.pipeline.config.interrupt_grace;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(outcome)) => self.complete(outcome),
                Ok(None) | Err(_) => break,
            }
        }

        for (_, run) in std::mem::take(&mut self.in_flight) {
            self.abandon(&run);
        }
    }
}

impl std::fmt::Debug for CompilerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerWorker")
            .field("strategy", &self.strategy)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
