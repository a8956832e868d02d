//! Workspace collaborator: per-run working directories.
//!
//! Used only while a run is submitted. Any failure here aborts the
//! submission, so no descriptor is ever created for a half-built directory.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Top-level folders under the workspace root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FolderKind {
    Matrices,
    Settings,
    Reports,
}

impl FolderKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Matrices => "matrices",
            Self::Settings => "settings",
            Self::Reports => "reports",
        }
    }
}

impl fmt::Display for FolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("workspace I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid workspace path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

impl WorkspaceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-handle operations the pipeline needs at submission.
pub trait Workspace: Send + Sync {
    /// Absolute path of `relative` inside the `kind` folder. Absolute inputs
    /// are returned unchanged.
    fn resolve(&self, kind: FolderKind, relative: &Path) -> Result<PathBuf, WorkspaceError>;

    /// Copies `source` into `dest_dir`, keeping its file name.
    fn copy_into(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf, WorkspaceError>;

    /// Creates `relative` (and its parents) inside the `kind` folder.
    fn create_folder(&self, kind: FolderKind, relative: &Path) -> Result<PathBuf, WorkspaceError>;

    /// Deletes a run's working directory. Missing directories are not an error.
    fn delete_folder(&self, path: &Path) -> Result<(), WorkspaceError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(path, e)),
        }
    }
}

/// [`Workspace`] rooted at a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, kind: FolderKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }
}

/// Rejects relative paths that would climb out of their folder.
fn check_relative(path: &Path) -> Result<(), WorkspaceError> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(WorkspaceError::InvalidPath {
            path: path.to_path_buf(),
            reason: "must not leave the workspace".to_string(),
        });
    }
    Ok(())
}

impl Workspace for FsWorkspace {
    fn resolve(&self, kind: FolderKind, relative: &Path) -> Result<PathBuf, WorkspaceError> {
        if relative.is_absolute() {
            return Ok(relative.to_path_buf());
        }
        check_relative(relative)?;
        Ok(self.folder(kind).join(relative))
    }

    fn copy_into(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf, WorkspaceError> {
        if !source.is_file() {
            return Err(WorkspaceError::NotFound {
                path: source.to_path_buf(),
            });
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidPath {
                path: source.to_path_buf(),
                reason: "no file name".to_string(),
            })?;

        std::fs::create_dir_all(dest_dir).map_err(|e| WorkspaceError::io(dest_dir, e))?;
        let target = dest_dir.join(file_name);
        std::fs::copy(source, &target).map_err(|e| WorkspaceError::io(&target, e))?;
        Ok(target)
    }

    fn create_folder(&self, kind: FolderKind, relative: &Path) -> Result<PathBuf, WorkspaceError> {
        let path = self.resolve(kind, relative)?;
        std::fs::create_dir_all(&path).map_err(|e| WorkspaceError::io(&path, e))?;
        Ok(path)
    }
}
