//! Executable script bodies and the context they run in.

use crate::debug::{DebugController, DebugError};
use crate::outcome::{OutcomeCollector, OutcomeError};
use crate::run::{CaseRange, RunId};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`TestScript::run`].
pub type ScriptFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScriptError>> + Send + 'a>>;

/// Errors raised by a running script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Cooperative cancellation; never reported as a failure.
    #[error("script canceled")]
    Canceled,

    /// The script body failed.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every variant of an outcome group failed.
    #[error(transparent)]
    Outcome(#[from] OutcomeError),
}

impl ScriptError {
    /// Failure with a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Failure wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<DebugError> for ScriptError {
    fn from(_: DebugError) -> Self {
        Self::Canceled
    }
}

/// The executable body of a compiled matrix.
///
/// # Example
///
/// ```ignore
/// struct Smoke;
///
/// impl TestScript for Smoke {
///     fn run<'a>(&'a self, ctx: &'a mut ScriptContext) -> ScriptFuture<'a> {
///         Box::pin(async move {
///             ctx.checkpoint("open session").await?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait TestScript: Send + Sync + 'static {
    /// Executes the script. Implementations should call
    /// [`ScriptContext::checkpoint`] before each observable step.
    fn run<'a>(&'a self, ctx: &'a mut ScriptContext) -> ScriptFuture<'a>;

    /// Releases loader-level resources. Called once when the artifact is dropped.
    fn dispose(&self) {}
}

/// Everything a running script may touch.
pub struct ScriptContext {
    run_id: RunId,
    work_folder: PathBuf,
    range: CaseRange,
    continue_on_failure: bool,
    settings: BTreeMap<String, String>,
    debug: Arc<DebugController>,
    cancellation: CancellationToken,
    outcomes: OutcomeCollector,
}

impl ScriptContext {
    pub fn new(
        run_id: RunId,
        work_folder: impl Into<PathBuf>,
        debug: Arc<DebugController>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            work_folder: work_folder.into(),
            range: CaseRange::all(),
            continue_on_failure: false,
            settings: BTreeMap::new(),
            debug,
            cancellation,
            outcomes: OutcomeCollector::new(),
        }
    }

    pub fn with_range(mut self, range: CaseRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    pub fn with_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    pub fn range(&self) -> &CaseRange {
        &self.range
    }

    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn debug(&self) -> &DebugController {
        &self.debug
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn outcomes(&self) -> &OutcomeCollector {
        &self.outcomes
    }

    pub fn outcomes_mut(&mut self) -> &mut OutcomeCollector {
        &mut self.outcomes
    }

    pub(crate) fn take_outcomes(&mut self) -> OutcomeCollector {
        std::mem::take(&mut self.outcomes)
    }

    /// Debug checkpoint before an observable step.
    ///
    /// Fails with [`ScriptError::Canceled`] once the run is interrupted.
    pub async fn checkpoint(&self, description: &str) -> Result<(), ScriptError> {
        if self.cancellation.is_cancelled() {
            return Err(ScriptError::Canceled);
        }
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ScriptError::Canceled),
            result = self.debug.await_continue(description) => result.map_err(ScriptError::from),
        }
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("run_id", &self.run_id)
            .field("work_folder", &self.work_folder)
            .field("range", &self.range)
            .field("continue_on_failure", &self.continue_on_failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::root_cause_message;
    use std::io;
    use std::time::Duration;

    fn context() -> ScriptContext {
        ScriptContext::new(
            RunId::new(1),
            "/tmp/run-1",
            Arc::new(DebugController::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_checkpoint_passes_when_running() {
        let ctx = context();
        assert!(ctx.checkpoint("step").await.is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_fails_after_cancel() {
        let ctx = context();
        ctx.cancellation().cancel();
        assert!(ctx.checkpoint("step").await.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_checkpoint() {
        let debug = Arc::new(DebugController::paused("hold"));
        let token = CancellationToken::new();
        let ctx = ScriptContext::new(RunId::new(2), "/tmp", debug, token.clone());

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(1), ctx.checkpoint("held"))
            .await
            .expect("cancel should wake the checkpoint");
        assert!(result.unwrap_err().is_canceled());
        cancel.await.unwrap();
    }

    #[test]
    fn test_debug_error_maps_to_canceled() {
        let err: ScriptError = DebugError::Stopped.into();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_failure_root_cause() {
        let err = ScriptError::with_source(
            "case 3 failed",
            io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        );
        assert_eq!(err.to_string(), "case 3 failed");
        assert_eq!(root_cause_message(&err), "connection refused");
    }

    #[test]
    fn test_builder_setters() {
        let ctx = context()
            .with_continue_on_failure(true)
            .with_range("2".parse().unwrap());
        assert!(ctx.continue_on_failure());
        assert!(ctx.range().contains(2));
        assert!(!ctx.range().contains(1));
        assert_eq!(ctx.run_id(), RunId::new(1));
    }
}
