//! Contracts for the subsystems the pipeline drives but does not own.
//!
//! - [`ScriptCompiler`]: turns a submitted run into a [`CompiledArtifact`]
//! - [`TestScript`]: the executable body inside an artifact
//! - [`ReportSink`]: receives exactly one report per run
//! - [`Workspace`]: materializes per-run working directories at submission

mod compiler;
mod report;
mod script;
mod workspace;

pub use compiler::{CompileError, CompileRequest, CompiledArtifact, ScriptCompiler};
pub use report::{
    FileReportSink, GroupVerdict, MemoryReportSink, NullReportSink, ReportError, ReportHeader,
    ReportRecord, ReportSink, REPORT_FILE_NAME,
};
pub use script::{ScriptContext, ScriptError, ScriptFuture, TestScript};
pub use workspace::{FolderKind, FsWorkspace, Workspace, WorkspaceError};
