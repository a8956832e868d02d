//! Report sink collaborator.
//!
//! Every run produces exactly one report: `create_report`, an optional
//! `create_exception`, then `close_report`. This holds for canceled and
//! init-failed runs too, so downstream storage always sees a closed run.

use crate::outcome::OutcomeStatus;
use crate::run::RunId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// File name written by [`FileReportSink`] inside each run's working directory.
pub const REPORT_FILE_NAME: &str = "report.txt";

/// Report sink failures. These are logged by the pipeline, never fatal to it.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no open report for run {0}")]
    NotOpen(RunId),
}

/// Header written when a report is created.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportHeader {
    pub run_id: RunId,
    /// Matrix name.
    pub name: String,
    /// Script name, or the matrix path when nothing was compiled.
    pub description: String,
    pub environment: String,
    pub user: String,
    pub tags: Vec<String>,
    pub work_folder: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Settled verdict of one outcome group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupVerdict {
    pub group: String,
    pub status: OutcomeStatus,
}

/// Consumer of run reports.
pub trait ReportSink: Send + Sync {
    fn create_report(&self, header: &ReportHeader) -> Result<(), ReportError>;

    fn create_exception(&self, run_id: RunId, cause: &str) -> Result<(), ReportError>;

    /// Group verdicts collected during execution. Not called for runs that
    /// never executed.
    fn record_groups(&self, _run_id: RunId, _groups: &[GroupVerdict]) -> Result<(), ReportError> {
        Ok(())
    }

    fn close_report(&self, run_id: RunId) -> Result<(), ReportError>;
}

/// Sink that discards reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReportSink;

impl ReportSink for NullReportSink {
    fn create_report(&self, _header: &ReportHeader) -> Result<(), ReportError> {
        Ok(())
    }

    fn create_exception(&self, _run_id: RunId, _cause: &str) -> Result<(), ReportError> {
        Ok(())
    }

    fn close_report(&self, _run_id: RunId) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Report captured by [`MemoryReportSink`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportRecord {
    pub header: Option<ReportHeader>,
    pub exceptions: Vec<String>,
    pub groups: Vec<GroupVerdict>,
    pub created: usize,
    pub closed: usize,
}

/// Sink that keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    reports: Mutex<HashMap<RunId, ReportRecord>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, run_id: RunId) -> Option<ReportRecord> {
        self.reports.lock().get(&run_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ReportSink for MemoryReportSink {
    fn create_report(&self, header: &ReportHeader) -> Result<(), ReportError> {
        let mut reports = self.reports.lock();
        let record = reports.entry(header.run_id).or_default();
        record.header = Some(header.clone());
        record.created += 1;
        Ok(())
    }

    fn create_exception(&self, run_id: RunId, cause: &str) -> Result<(), ReportError> {
        let mut reports = self.reports.lock();
        let record = reports.get_mut(&run_id).ok_or(ReportError::NotOpen(run_id))?;
        record.exceptions.push(cause.to_string());
        Ok(())
    }

    fn record_groups(&self, run_id: RunId, groups: &[GroupVerdict]) -> Result<(), ReportError> {
        let mut reports = self.reports.lock();
        let record = reports.get_mut(&run_id).ok_or(ReportError::NotOpen(run_id))?;
        record.groups.extend_from_slice(groups);
        Ok(())
    }

    fn close_report(&self, run_id: RunId) -> Result<(), ReportError> {
        let mut reports = self.reports.lock();
        let record = reports.get_mut(&run_id).ok_or(ReportError::NotOpen(run_id))?;
        record.closed += 1;
        Ok(())
    }
}

/// Sink that writes a plain-text report into each run's working directory.
#[derive(Debug, Default)]
pub struct FileReportSink {
    open: Mutex<HashMap<RunId, File>>,
}

impl FileReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, run_id: RunId, line: &str) -> Result<(), ReportError> {
        let mut open = self.open.lock();
        let file = open.get_mut(&run_id).ok_or(ReportError::NotOpen(run_id))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl ReportSink for FileReportSink {
    fn create_report(&self, header: &ReportHeader) -> Result<(), ReportError> {
        std::fs::create_dir_all(&header.work_folder)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(header.work_folder.join(REPORT_FILE_NAME))?;

        writeln!(file, "run:         {}", header.run_id)?;
        writeln!(file, "matrix:      {}", header.name)?;
        writeln!(file, "script:      {}", header.description)?;
        writeln!(file, "environment: {}", header.environment)?;
        writeln!(file, "user:        {}", header.user)?;
        if !header.tags.is_empty() {
            writeln!(file, "tags:        {}", header.tags.join(", "))?;
        }
        writeln!(file, "created:     {}", header.created_at.to_rfc3339())?;

        self.open.lock().insert(header.run_id, file);
        Ok(())
    }

    fn create_exception(&self, run_id: RunId, cause: &str) -> Result<(), ReportError> {
        self.append(run_id, &format!("exception:   {}", cause))
    }

    fn record_groups(&self, run_id: RunId, groups: &[GroupVerdict]) -> Result<(), ReportError> {
        for verdict in groups {
            self.append(
                run_id,
                &format!("group:       {} = {}", verdict.group, verdict.status),
            )?;
        }
        Ok(())
    }

    fn close_report(&self, run_id: RunId) -> Result<(), ReportError> {
        let mut file = self
            .open
            .lock()
            .remove(&run_id)
            .ok_or(ReportError::NotOpen(run_id))?;
        writeln!(file, "closed:      {}", Utc::now().to_rfc3339())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(run_id: u64, work_folder: PathBuf) -> ReportHeader {
        ReportHeader {
            run_id: RunId::new(run_id),
            name: "login".to_string(),
            description: "LoginSuite".to_string(),
            environment: "default".to_string(),
            user: "qa".to_string(),
            tags: vec!["smoke".to_string()],
            work_folder,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_sink_records_lifecycle() {
        let sink = MemoryReportSink::new();
        sink.create_report(&header(1, PathBuf::from("/tmp"))).unwrap();
        sink.create_exception(RunId::new(1), "boom").unwrap();
        sink.close_report(RunId::new(1)).unwrap();

        let record = sink.report(RunId::new(1)).unwrap();
        assert_eq!(record.created, 1);
        assert_eq!(record.closed, 1);
        assert_eq!(record.exceptions, vec!["boom"]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_memory_sink_requires_open_report() {
        let sink = MemoryReportSink::new();
        assert!(matches!(
            sink.close_report(RunId::new(9)),
            Err(ReportError::NotOpen(_))
        ));
    }

    #[test]
    fn test_file_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileReportSink::new();
        sink.create_report(&header(3, dir.path().to_path_buf()))
            .unwrap();
        sink.record_groups(
            RunId::new(3),
            &[GroupVerdict {
                group: "login".to_string(),
                status: OutcomeStatus::Passed,
            }],
        )
        .unwrap();
        sink.create_exception(RunId::new(3), "connection refused")
            .unwrap();
        sink.close_report(RunId::new(3)).unwrap();

        let text = std::fs::read_to_string(dir.path().join(REPORT_FILE_NAME)).unwrap();
        assert!(text.contains("LoginSuite"));
        assert!(text.contains("login = Passed"));
        assert!(text.contains("connection refused"));
        assert!(text.contains("closed:"));

        assert!(sink.close_report(RunId::new(3)).is_err());
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let sink = NullReportSink;
        assert!(sink.close_report(RunId::new(1)).is_ok());
    }
}
