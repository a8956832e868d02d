//! Executor worker: admits ready runs and supervises their execution.
//!
//! Each tick scans the ready-run queue front to back. Canceled runs are
//! finalized on the spot. Any other run is admitted only if a slot is free
//! and its declared services are disjoint from the [`ServiceLockSet`];
//! otherwise it stays queued for a later tick.
//!
//! - **Serial**: one run at a time, awaited by the loop itself.
//! - **Bounded**: up to `max_concurrent_runs` spawned runs, reaped each tick.

use super::config::ExecutorStrategy;
use super::locks::ServiceLockSet;
use super::pipeline::{Pipeline, RunEnd, SHUTDOWN_INTERRUPTED_CAUSE};
use crate::collaborators::{GroupVerdict, ScriptContext, ScriptError};
use crate::error::root_cause_message;
use crate::outcome::OutcomeCollector;
use crate::registry::QueueKind;
use crate::run::{RunDescriptor, RunId, RunStatus, CANCELED_CAUSE};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a script task hands back when it ends.
struct Execution {
    result: Result<(), ScriptError>,
    verdicts: Vec<GroupVerdict>,
}

/// A run the executor has admitted.
struct ActiveRun {
    run: Arc<RunDescriptor>,
    services: BTreeSet<String>,
    handle: JoinHandle<Execution>,
    report_open: bool,
    interrupted_at: Option<Instant>,
}

/// A queued run waiting for services held by others.
struct Blocked {
    since: Instant,
    warned: bool,
}

enum Wake {
    Shutdown,
    Done(Result<Execution, JoinError>),
    Tick,
}

fn verdicts(outcomes: &OutcomeCollector) -> Vec<GroupVerdict> {
    outcomes
        .groups()
        .iter()
        .filter_map(|group| {
            outcomes.group_status(group).ok().map(|status| GroupVerdict {
                group: group.clone(),
                status,
            })
        })
        .collect()
}

/// Background loop executing compiled runs.
pub struct ExecutorWorker {
    pipeline: Arc<Pipeline>,
    strategy: ExecutorStrategy,
    locks: ServiceLockSet,
    active: Vec<ActiveRun>,
    blocked: HashMap<RunId, Blocked>,
}

impl ExecutorWorker {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        let strategy = pipeline.config.executor_strategy;
        Self {
            pipeline,
            strategy,
            locks: ServiceLockSet::new(),
            active: Vec::new(),
            blocked: HashMap::new(),
        }
    }

    /// Runs the loop until `shutdown` fires, then interrupts whatever is
    /// still executing.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            strategy = %self.strategy,
            slots = self.pipeline.config.execution_slots(),
            "Executor worker started"
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
                ExecutorStrategy::Serial => self.tick_serial(&shutdown).await,
                ExecutorStrategy::Bounded => self.tick_bounded().await,
            }
            self.pipeline.activity.touch();
        }

        self.shutdown().await;
        info!("Executor worker stopped");
    }

    async fn tick_bounded(&mut self) {
        self.reap().await;
        self.check_interrupted();
        self.scan_ready(true);
    }

    async fn tick_serial(&mut self, shutdown: &CancellationToken) {
        self.scan_ready(true);
        let Some(mut active) = self.active.pop() else {
            return;
        };

        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Wake::Shutdown,
                joined = &mut active.handle => Wake::Done(joined),
                _ = tokio::time::sleep(self.pipeline.config.poll_interval) => Wake::Tick,
            };

            match wake {
                Wake::Shutdown => {
                    self.active.push(active);
                    return;
                }
                Wake::Done(joined) => {
                    self.complete(active, joined);
                    return;
                }
                Wake::Tick => {
                    let grace = self.pipeline.config.interrupt_grace;
                    if Self::interrupt_expired(&mut active, grace) {
                        self.abandon(active);
                        return;
                    }
                    self.scan_ready(false);
                    self.pipeline.activity.touch();
                }
            }
        }
    }

    /// Walks the ready-run queue in order, finalizing canceled runs and,
    /// when `admit` is set, starting runs that fit.
    fn scan_ready(&mut self, admit: bool) {
        let queues = Arc::clone(&self.pipeline.queues);
        let slots = self.pipeline.config.execution_slots();

        for id in queues.snapshot(QueueKind::ReadyRun) {
            let Some(run) = self.pipeline.descriptor(id) else {
                queues.remove(QueueKind::ReadyRun, id);
                continue;
            };
            if run.is_terminal() {
                queues.remove(QueueKind::ReadyRun, id);
                self.blocked.remove(&id);
                continue;
            }
            if run.is_canceled() {
                if queues.remove(QueueKind::ReadyRun, id) {
                    self.blocked.remove(&id);
                    info!(run_id = %id, "Run canceled before execution");
                    self.pipeline
                        .finalize(&run, RunEnd::canceled_by_user(), false, &[]);
                }
                continue;
            }
            if !admit || self.active.len() >= slots {
                continue;
            }

            let services = run.services();
            if !self.locks.try_acquire(&services) {
                self.note_blocked(&run, &services);
                continue;
            }
            if !queues.remove(QueueKind::ReadyRun, id) {
                self.locks.release(&services);
                continue;
            }
            self.blocked.remove(&id);
            self.start(run, services);
        }
    }

    fn note_blocked(&mut self, run: &RunDescriptor, services: &BTreeSet<String>) {
        let threshold = self.pipeline.config.admission_warn_after;
        let conflicts = self.locks.conflicts(services);
        let entry = self.blocked.entry(run.id()).or_insert_with(|| {
            debug!(run_id = %run.id(), conflicts = ?conflicts, "Run waiting for services");
            Blocked {
                since: Instant::now(),
                warned: false,
            }
        });
        if !entry.warned && entry.since.elapsed() >= threshold {
            entry.warned = true;
            warn!(
                run_id = %run.id(),
                conflicts = ?conflicts,
                waited_secs = entry.since.elapsed().as_secs(),
                "Run still blocked on services"
            );
        }
    }

    fn start(&mut self, run: Arc<RunDescriptor>, services: BTreeSet<String>) {
        let Some(artifact) = run.artifact() else {
            self.locks.release(&services);
            error!(run_id = %run.id(), "Ready run has no compiled artifact");
            self.pipeline.finalize(
                &run,
                RunEnd::finished(
                    RunStatus::InitFailed,
                    Some("no compiled artifact".to_string()),
                ),
                false,
                &[],
            );
            return;
        };

        run.mark_running();
        let report_open = self.pipeline.open_report(&run);
        info!(
            run_id = %run.id(),
            script = %artifact.script_name(),
            services = ?services,
            "Run started"
        );

        let mut ctx = ScriptContext::new(
            run.id(),
            run.work_folder(),
            Arc::clone(run.debug()),
            run.cancellation().clone(),
        )
        .with_range(run.range().clone())
        .with_continue_on_failure(run.params().continue_on_failure)
        .with_settings(artifact.settings().clone());
        let script = artifact.script();

        let handle = tokio::spawn(async move {
            let result = script.run(&mut ctx).await;
            let outcomes = ctx.take_outcomes();
            Execution {
                result,
                verdicts: verdicts(&outcomes),
            }
        });

        self.active.push(ActiveRun {
            run,
            services,
            handle,
            report_open,
            interrupted_at: None,
        });
    }

    /// Completes every finished execution.
    async fn reap(&mut self) {
        let mut index = 0;
        while index < self.active.len() {
            if !self.active[index].handle.is_finished() {
                index += 1;
                continue;
            }
            let mut active = self.active.remove(index);
            let joined = (&mut active.handle).await;
            self.complete(active, joined);
        }
    }

    fn complete(&mut self, active: ActiveRun, joined: Result<Execution, JoinError>) {
        self.locks.release(&active.services);
        let run = active.run;
        let id = run.id();

        let (end, verdicts) = match joined {
            Ok(Execution {
                result: Ok(()),
                verdicts,
            }) => (RunEnd::finished(RunStatus::Executed, None), verdicts),
            Ok(Execution {
                result: Err(e),
                verdicts,
            }) if e.is_canceled() || run.cancellation().is_cancelled() => {
                (self.interrupted_end(), verdicts)
            }
            Ok(Execution {
                result: Err(e),
                verdicts,
            }) => {
                let cause = root_cause_message(&e);
                error!(run_id = %id, error = %e, cause = %cause, "Run failed");
                (RunEnd::finished(RunStatus::RunFailed, Some(cause)), verdicts)
            }
            Err(e) => {
                let cause = if e.is_panic() {
                    "script panicked".to_string()
                } else {
                    root_cause_message(&e)
                };
                error!(run_id = %id, error = %e, "Run task failed");
                (RunEnd::finished(RunStatus::RunFailed, Some(cause)), Vec::new())
            }
        };

        self.pipeline
            .finalize(&run, end, active.report_open, &verdicts);
    }

    fn interrupted_end(&self) -> RunEnd {
        let cause = if self.pipeline.is_shutting_down() {
            SHUTDOWN_INTERRUPTED_CAUSE
        } else {
            CANCELED_CAUSE
        };
        RunEnd::canceled(RunStatus::Interrupted, cause)
    }

    /// Stamps newly interrupted runs. Returns true once the grace period of
    /// an interrupted run has elapsed.
    fn interrupt_expired(active: &mut ActiveRun, grace: Duration) -> bool {
        if !active.run.cancellation().is_cancelled() {
            return false;
        }
        active.interrupted_at.get_or_insert_with(Instant::now).elapsed() >= grace
    }

    /// Abandons interrupted runs that outlived the grace period.
    fn check_interrupted(&mut self) {
        let grace = self.pipeline.config.interrupt_grace;
        let mut index = 0;
        while index < self.active.len() {
            let expired = Self::interrupt_expired(&mut self.active[index], grace);
            if expired {
                let active = self.active.remove(index);
                self.abandon(active);
            } else {
                index += 1;
            }
        }
    }

    /// Gives up on a run that ignored its interrupt. Its task is aborted,
    /// its services are released and it is finalized as interrupted.
    fn abandon(&mut self, active: ActiveRun) {
        active.handle.abort();
        warn!(
            run_id = %active.run.id(),
            grace_ms = self.pipeline.config.interrupt_grace.as_millis() as u64,
            "Run still alive after interrupt"
        );
        self.locks.release(&active.services);
        let end = self.interrupted_end();
        self.pipeline
            .finalize(&active.run, end, active.report_open, &[]);
    }

    async fn shutdown(&mut self) {
        let active = std::mem::take(&mut self.active);
        if active.is_empty() {
            return;
        }
        debug!(running = active.len(), "Interrupting running scripts");
        for entry in &active {
            entry.run.interrupt();
        }

        let deadline = Instant::now() + self.pipeline.config.interrupt_grace;
        for mut entry in active {
            match tokio::time::timeout_at(deadline, &mut entry.handle).await {
                Ok(joined) => self.complete(entry, joined),
                Err(_) => self.abandon(entry),
            }
        }
    }
}

impl std::fmt::Debug for ExecutorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorWorker")
            .field("strategy", &self.strategy)
            .field("running", &self.active.len())
            .field("held_services", self.locks.held())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CompileError, CompileRequest, CompiledArtifact, MemoryReportSink, ScriptCompiler,
        ScriptFuture, TestScript,
    };
    use crate::registry::ListenerSet;
    use crate::run::{CaseRange, RunLocation, RunParams, RunState};
    use crate::scheduler::SchedulerConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Unused;

    impl ScriptCompiler for Unused {
        fn compile(
            &self,
            _request: &CompileRequest,
            _cancel: &CancellationToken,
        ) -> Result<CompiledArtifact, CompileError> {
            Err(CompileError::other("unused"))
        }
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Sleeps through its interrupt without ever checking the token.
    struct Stubborn {
        dropped: Arc<AtomicBool>,
    }

    impl TestScript for Stubborn {
        fn run<'a>(&'a self, _ctx: &'a mut ScriptContext) -> ScriptFuture<'a> {
            let guard = SetOnDrop(Arc::clone(&self.dropped));
            Box::pin(async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        }
    }

    struct Quick;

    impl TestScript for Quick {
        fn run<'a>(&'a self, _ctx: &'a mut ScriptContext) -> ScriptFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    fn pipeline(config: SchedulerConfig) -> (Arc<Pipeline>, Arc<MemoryReportSink>) {
        let reports = Arc::new(MemoryReportSink::new());
        let pipeline = Pipeline::new(config, Arc::new(Unused), reports.clone());
        (Arc::new(pipeline), reports)
    }

    fn ready_run(
        pipeline: &Pipeline,
        id: u64,
        script: Arc<dyn TestScript>,
        services: &[&str],
    ) -> Arc<RunDescriptor> {
        let run = RunDescriptor::new(
            RunId::new(id),
            RunParams::builder(format!("suite/run{id}.matrix")).build(),
            CaseRange::all(),
            RunLocation {
                work_folder: format!("/tmp/run-{id}").into(),
                matrix_file: format!("/tmp/run-{id}/run{id}.matrix").into(),
                settings_file: None,
            },
            Arc::new(ListenerSet::new()),
        );
        let artifact = CompiledArtifact::new(format!("run{id}"), script)
            .with_services(services.iter().copied());
        pipeline.runs.insert(run.id(), Arc::clone(&run));
        run.mark_pending();
        run.mark_preparing();
        run.mark_ready(Arc::new(artifact));
        pipeline.queues.push_back(QueueKind::ReadyRun, run.id());
        run
    }

    #[tokio::test]
    async fn test_shared_service_waits_for_holder() {
        let (pipeline, _) = pipeline(SchedulerConfig::default());
        let mut worker = ExecutorWorker::new(Arc::clone(&pipeline));
        let first = ready_run(&pipeline, 1, Arc::new(Quick), &["svcA"]);
        let second = ready_run(&pipeline, 2, Arc::new(Quick), &["svcA", "svcB"]);

        worker.scan_ready(true);
        assert_eq!(worker.active.len(), 1);
        assert!(worker.blocked.contains_key(&second.id()));
        assert_eq!(worker.locks.held().len(), 1);
        assert_eq!(
            pipeline.queues.snapshot(QueueKind::ReadyRun),
            vec![second.id()]
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.reap().await;
        assert_eq!(first.status(), RunStatus::Executed);
        assert!(worker.locks.is_empty());

        worker.scan_ready(true);
        assert!(worker.blocked.is_empty());
        assert_eq!(worker.locks.held().len(), 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.reap().await;
        assert_eq!(second.status(), RunStatus::Executed);
    }

    #[tokio::test]
    async fn test_terminal_run_leaves_blocked_map() {
        let (pipeline, _) = pipeline(SchedulerConfig::default());
        let mut worker = ExecutorWorker::new(Arc::clone(&pipeline));
        let dropped = Arc::new(AtomicBool::new(false));
        ready_run(
            &pipeline,
            1,
            Arc::new(Stubborn {
                dropped: Arc::clone(&dropped),
            }),
            &["svcA"],
        );
        let waiting = ready_run(&pipeline, 2, Arc::new(Quick), &["svcA"]);

        worker.scan_ready(true);
        assert!(worker.blocked.contains_key(&waiting.id()));

        pipeline.finalize(
            &waiting,
            RunEnd::finished(RunStatus::NotStarted, None),
            false,
            &[],
        );
        worker.scan_ready(true);
        assert!(worker.blocked.is_empty());
        assert!(pipeline.queues.snapshot(QueueKind::ReadyRun).is_empty());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_ignoring_interrupt_is_abandoned() {
        let config = SchedulerConfig::default().with_interrupt_grace(Duration::from_millis(40));
        let (pipeline, reports) = pipeline(config);
        let mut worker = ExecutorWorker::new(Arc::clone(&pipeline));
        let dropped = Arc::new(AtomicBool::new(false));
        let run = ready_run(
            &pipeline,
            1,
            Arc::new(Stubborn {
                dropped: Arc::clone(&dropped),
            }),
            &["svcA"],
        );

        worker.scan_ready(true);
        assert_eq!(run.state(), RunState::Running);
        assert!(run.request_cancel());

        worker.check_interrupted();
        assert_eq!(worker.active.len(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        worker.check_interrupted();

        assert!(worker.active.is_empty());
        assert!(worker.locks.is_empty());
        assert_eq!(run.state(), RunState::Canceled);
        assert_eq!(run.status(), RunStatus::Interrupted);
        assert_eq!(run.cause().as_deref(), Some(CANCELED_CAUSE));
        assert!(!run.is_locked());
        assert_eq!(reports.report(run.id()).unwrap().closed, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dropped.load(Ordering::SeqCst), "abandoned task should be aborted");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_active_runs() {
        let config = SchedulerConfig::default().with_interrupt_grace(Duration::from_millis(20));
        let (pipeline, _) = pipeline(config);
        let mut worker = ExecutorWorker::new(Arc::clone(&pipeline));
        let dropped = Arc::new(AtomicBool::new(false));
        let run = ready_run(
            &pipeline,
            1,
            Arc::new(Stubborn {
                dropped: Arc::clone(&dropped),
            }),
            &[],
        );

        worker.scan_ready(true);
        assert!(pipeline.begin_shutdown());
        worker.shutdown().await;

        assert_eq!(run.status(), RunStatus::Interrupted);
        assert_eq!(run.cause().as_deref(), Some(SHUTDOWN_INTERRUPTED_CAUSE));
        assert!(run.cancellation().is_cancelled());
    }
}
