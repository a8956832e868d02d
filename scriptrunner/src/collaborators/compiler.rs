//! Compiler collaborator contract.
//!
//! Matrix parsing and code generation live outside the pipeline. The compiler
//! worker hands each run to a [`ScriptCompiler`] and receives an opaque
//! [`CompiledArtifact`] back.

use super::script::TestScript;
use crate::run::{RunId, RunParams};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised while preparing or compiling a run.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Cooperative cancellation; the run is canceled, not failed.
    #[error("compilation canceled")]
    Canceled,

    /// The matrix could not be turned into a script.
    #[error("invalid matrix {}: {message}", path.display())]
    Matrix { path: PathBuf, message: String },

    /// Reading inputs or writing generated code failed.
    #[error("I/O error during compilation: {0}")]
    Io(#[from] io::Error),

    /// Any other failure reported by the compiler implementation.
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CompileError {
    pub fn matrix(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Matrix {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Inputs handed to the compiler for one run.
#[derive(Clone, Debug)]
pub struct CompileRequest {
    pub run_id: RunId,
    /// Matrix snapshot inside the run's working directory.
    pub matrix_file: PathBuf,
    /// Settings snapshot inside the run's working directory.
    pub settings_file: Option<PathBuf>,
    pub work_folder: PathBuf,
    pub params: RunParams,
}

/// Compiled, loadable form of a run.
///
/// Dropping the last handle disposes the script, which releases whatever the
/// compiler allocated for it.
pub struct CompiledArtifact {
    script_name: String,
    services: BTreeSet<String>,
    settings: BTreeMap<String, String>,
    script: Arc<dyn TestScript>,
}

impl CompiledArtifact {
    pub fn new(script_name: impl Into<String>, script: Arc<dyn TestScript>) -> Self {
        Self {
            script_name: script_name.into(),
            services: BTreeSet::new(),
            settings: BTreeMap::new(),
            script,
        }
    }

    /// Declares the external services the script uses exclusively.
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.extend(services.into_iter().map(Into::into));
        self
    }

    pub fn with_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn script(&self) -> Arc<dyn TestScript> {
        Arc::clone(&self.script)
    }
}

impl Drop for CompiledArtifact {
    fn drop(&mut self) {
        self.script.dispose();
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("script_name", &self.script_name)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Turns a submitted run into a [`CompiledArtifact`].
///
/// `compile` runs on a blocking thread. Long compilations should poll
/// `cancel` and return [`CompileError::Canceled`] once it fires.
pub trait ScriptCompiler: Send + Sync + 'static {
    fn compile(
        &self,
        request: &CompileRequest,
        cancel: &CancellationToken,
    ) -> Result<CompiledArtifact, CompileError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::script::{ScriptContext, ScriptFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Disposable(Arc<AtomicUsize>);

    impl TestScript for Disposable {
        fn run<'a>(&'a self, _ctx: &'a mut ScriptContext) -> ScriptFuture<'a> {
            Box::pin(async { Ok(()) })
        }

        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_artifact_disposes_on_drop() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let artifact = Arc::new(CompiledArtifact::new(
            "LoginSuite",
            Arc::new(Disposable(disposed.clone())),
        ));
        let second = Arc::clone(&artifact);
        drop(artifact);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_artifact_services() {
        let artifact = CompiledArtifact::new("S", Arc::new(Disposable(Arc::default())))
            .with_services(["svcA", "svcB", "svcA"]);
        assert_eq!(artifact.services().len(), 2);
        assert!(artifact.services().contains("svcA"));
        assert_eq!(artifact.script_name(), "S");
    }

    #[test]
    fn test_error_display() {
        let err = CompileError::matrix("suite.csv", "missing #id column");
        assert!(err.to_string().contains("suite.csv"));
        assert!(err.to_string().contains("missing #id column"));
        assert!(CompileError::Canceled.is_canceled());
        assert!(!CompileError::other("x").is_canceled());
    }
}
