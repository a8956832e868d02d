//! State shared by the registry and both worker loops, and the single place
//! runs are finalized.

use super::config::SchedulerConfig;
use super::watchdog::ActivityClock;
use crate::collaborators::{GroupVerdict, ReportHeader, ReportSink, ScriptCompiler};
use crate::registry::RunQueues;
use crate::run::{RunDescriptor, RunId, RunState, RunStatus, CANCELED_CAUSE};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Cause recorded for queued runs discarded at shutdown.
pub const SHUTDOWN_NOT_STARTED_CAUSE: &str = "registry shut down before the run started";

/// Cause recorded for runs interrupted by shutdown.
pub const SHUTDOWN_INTERRUPTED_CAUSE: &str = "interrupted by shutdown";

/// How a run ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RunEnd {
    pub state: RunState,
    pub status: RunStatus,
    pub cause: Option<String>,
}

impl RunEnd {
    pub fn finished(status: RunStatus, cause: Option<String>) -> Self {
        Self {
            state: RunState::Finished,
            status,
            cause,
        }
    }

    pub fn canceled(status: RunStatus, cause: impl Into<String>) -> Self {
        Self {
            state: RunState::Canceled,
            status,
            cause: Some(cause.into()),
        }
    }

    /// Canceled by an operator before it ever executed.
    pub fn canceled_by_user() -> Self {
        Self::canceled(RunStatus::Canceled, CANCELED_CAUSE)
    }
}

/// Shared pipeline state.
pub(crate) struct Pipeline {
    pub runs: DashMap<RunId, Arc<RunDescriptor>>,
    pub queues: Arc<RunQueues>,
    pub reports: Arc<dyn ReportSink>,
    pub compiler: Arc<dyn ScriptCompiler>,
    pub config: SchedulerConfig,
    pub activity: Arc<ActivityClock>,
    shutting_down: AtomicBool,
}

impl Pipeline {
    pub fn new(
        config: SchedulerConfig,
        compiler: Arc<dyn ScriptCompiler>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            runs: DashMap::new(),
            queues: Arc::new(RunQueues::new()),
            reports,
            compiler,
            config,
            activity: Arc::new(ActivityClock::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self, id: RunId) -> Option<Arc<RunDescriptor>> {
        self.runs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flips the shutdown flag. Returns false if it was already set.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    fn header(run: &RunDescriptor) -> ReportHeader {
        let snapshot = run.snapshot();
        ReportHeader {
            run_id: run.id(),
            name: run.params().matrix_name(),
            description: snapshot
                .script_name
                .unwrap_or_else(|| run.matrix_file().display().to_string()),
            environment: run.params().environment.clone(),
            user: run.params().user.clone(),
            tags: run.params().tags.clone(),
            work_folder: run.work_folder().to_path_buf(),
            created_at: Utc::now(),
        }
    }

    /// Creates the run's report. Returns false if the sink refused it.
    pub fn open_report(&self, run: &RunDescriptor) -> bool {
        match self.reports.create_report(&Self::header(run)) {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %run.id(), error = %e, "Failed to create report");
                false
            }
        }
    }

    /// Writes the rest of the report triple, moves the run to its terminal
    /// state, then unlocks it.
    ///
    /// Every run passes through here exactly once, whichever way it ends.
    pub fn finalize(
        &self,
        run: &RunDescriptor,
        end: RunEnd,
        report_open: bool,
        groups: &[GroupVerdict],
    ) {
        if run.is_terminal() {
            return;
        }
        let id = run.id();

        if !report_open {
            self.open_report(run);
        }
        if !groups.is_empty() {
            if let Err(e) = self.reports.record_groups(id, groups) {
                warn!(run_id = %id, error = %e, "Failed to record group verdicts");
            }
        }
        if let Some(cause) = &end.cause {
            if let Err(e) = self.reports.create_exception(id, cause) {
                warn!(run_id = %id, error = %e, "Failed to record report exception");
            }
        }
        if let Err(e) = self.reports.close_report(id) {
            warn!(run_id = %id, error = %e, "Failed to close report");
        }

        match end.state {
            RunState::Canceled => run.mark_canceled(end.status, end.cause.clone()),
            _ => run.mark_finished(end.status, end.cause.clone()),
        };
        run.unlock();

        info!(
            run_id = %id,
            state = %end.state,
            status = %end.status,
            cause = end.cause.as_deref().unwrap_or(""),
            "Run finalized"
        );
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("runs", &self.runs.len())
            .field("queues", &self.queues)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CompileError, CompileRequest, CompiledArtifact, MemoryReportSink,
    };
    use crate::outcome::OutcomeStatus;
    use crate::registry::ListenerSet;
    use crate::run::{CaseRange, RunLocation, RunParams};
    use tokio_util::sync::CancellationToken;

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

    fn setup() -> (Pipeline, Arc<MemoryReportSink>, Arc<RunDescriptor>) {
        let reports = Arc::new(MemoryReportSink::new());
        let pipeline = Pipeline::new(SchedulerConfig::default(), Arc::new(Unused), reports.clone());
        let run = RunDescriptor::new(
            RunId::new(4),
            RunParams::builder("suite/login.matrix").user("qa").build(),
            CaseRange::all(),
            RunLocation {
                work_folder: "/tmp/login/run-4".into(),
                matrix_file: "/tmp/login/run-4/login.matrix".into(),
                settings_file: None,
            },
            Arc::new(ListenerSet::new()),
        );
        (pipeline, reports, run)
    }

    #[test]
    fn test_finalize_writes_report_then_unlocks() {
        let (pipeline, reports, run) = setup();
        run.mark_pending();
        pipeline.finalize(&run, RunEnd::canceled_by_user(), false, &[]);

        assert_eq!(run.state(), RunState::Canceled);
        assert_eq!(run.status(), RunStatus::Canceled);
        assert!(!run.is_locked());

        let record = reports.report(run.id()).unwrap();
        assert_eq!(record.created, 1);
        assert_eq!(record.closed, 1);
        assert_eq!(record.exceptions, vec![CANCELED_CAUSE.to_string()]);
        let header = record.header.unwrap();
        assert_eq!(header.name, "login");
        assert_eq!(header.user, "qa");
    }

    #[test]
    fn test_finalize_records_groups() {
        let (pipeline, reports, run) = setup();
        run.mark_running();
        assert!(pipeline.open_report(&run));
        let groups = [GroupVerdict {
            group: "login".to_string(),
            status: OutcomeStatus::ConditionallyPassed,
        }];
        pipeline.finalize(&run, RunEnd::finished(RunStatus::Executed, None), true, &groups);

        let record = reports.report(run.id()).unwrap();
        assert_eq!(record.created, 1);
        assert_eq!(record.groups, groups.to_vec());
        assert!(record.exceptions.is_empty());
    }

    #[test]
    fn test_finalize_runs_once() {
        let (pipeline, reports, run) = setup();
        pipeline.finalize(
            &run,
            RunEnd::finished(RunStatus::InitFailed, Some("bad".into())),
            false,
            &[],
        );
        pipeline.finalize(&run, RunEnd::canceled_by_user(), false, &[]);

        assert_eq!(run.status(), RunStatus::InitFailed);
        assert_eq!(reports.report(run.id()).unwrap().closed, 1);
    }

    #[test]
    fn test_shutdown_flag() {
        let (pipeline, _, _) = setup();
        assert!(!pipeline.is_shutting_down());
        assert!(pipeline.begin_shutdown());
        assert!(!pipeline.begin_shutdown());
        assert!(pipeline.is_shutting_down());
    }
}
