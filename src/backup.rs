//! Backup and restore for one transaction.
//!
//! Every path a transaction is about to touch is captured once, first touch
//! wins. Restoring walks the snapshots in reverse capture order and either
//! rewrites the original bytes or deletes a file that did not exist before.
//! Restore failures are collected, never short-circuited: a partial rollback
//! must still attempt every snapshot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::errors::{Error, Result};
use crate::fs_ops::{AtomicWriter, FileSystem, io_error_with_help};

/// What a path looked like before the transaction touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotContent {
    /// Nothing existed at the path; restore deletes whatever is there.
    Missing,
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct BackupSnapshot {
    pub original_path: PathBuf,
    pub content: SnapshotContent,
    pub captured_at: DateTime<Utc>,
}

impl BackupSnapshot {
    pub fn existed_before(&self) -> bool {
        matches!(self.content, SnapshotContent::Bytes(_))
    }
}

/// Snapshots owned by a single transaction.
#[derive(Debug, Default)]
pub struct BackupScope {
    snapshots: Vec<BackupSnapshot>,
    captured: HashSet<PathBuf>,
    created_dirs: Vec<PathBuf>,
}

impl BackupScope {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.captured.contains(path)
    }

    /// Snapshots in capture order.
    pub fn snapshots(&self) -> &[BackupSnapshot] {
        &self.snapshots
    }

    pub fn snapshot(&self, path: &Path) -> Option<&BackupSnapshot> {
        self.snapshots.iter().find(|s| s.original_path == path)
    }

    /// Directories created during the transaction, outermost first.
    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created_dirs
    }
}

/// Outcome of [`BackupService::restore_all`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.failed.into_iter().map(|(_, e)| e).collect()
    }
}

pub struct BackupService<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> BackupService<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    pub fn begin_scope(&self) -> BackupScope {
        BackupScope::default()
    }

    /// Record the current state of `path`. A no-op if already captured in `scope`.
    pub fn capture(&self, scope: &mut BackupScope, path: &Path) -> Result<()> {
        if scope.contains(path) {
            trace!(path = %path.display(), "already captured; keeping oldest snapshot");
            return Ok(());
        }

        let content = if !self.fs.exists(path) {
            SnapshotContent::Missing
        } else if self.fs.is_dir(path) {
            return Err(Error::Validation(format!(
                "'{}' is a directory; only files can be backed up",
                path.display()
            )));
        } else {
            let bytes = self
                .fs
                .read(path)
                .map_err(io_error_with_help("read file for backup", path))?;
            SnapshotContent::Bytes(bytes)
        };

        trace!(path = %path.display(), existed = matches!(content, SnapshotContent::Bytes(_)), "captured snapshot");
        scope.captured.insert(path.to_path_buf());
        scope.snapshots.push(BackupSnapshot {
            original_path: path.to_path_buf(),
            content,
            captured_at: Utc::now(),
        });
        Ok(())
    }

    /// Create `dir` (and missing ancestors), remembering what was new so
    /// rollback can remove it again.
    pub fn ensure_dir(&self, scope: &mut BackupScope, dir: &Path) -> Result<()> {
        let mut missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|a| !a.as_os_str().is_empty() && !self.fs.exists(a))
            .map(Path::to_path_buf)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.fs
            .create_dir_all(dir)
            .map_err(io_error_with_help("create directory", dir))?;
        missing.reverse();
        scope.created_dirs.extend(missing);
        Ok(())
    }

    /// Put every captured path back, newest capture first.
    pub fn restore_all(&self, scope: BackupScope) -> RestoreReport {
        let writer = AtomicWriter::new(self.fs);
        let mut report = RestoreReport::default();

        for snap in scope.snapshots.iter().rev() {
            let path = &snap.original_path;
            let outcome = match &snap.content {
                SnapshotContent::Bytes(bytes) => writer.write_file_atomic(path, bytes),
                SnapshotContent::Missing if self.fs.exists(path) => self
                    .fs
                    .remove_file(path)
                    .map_err(io_error_with_help("remove file created by transaction", path)),
                SnapshotContent::Missing => Ok(()),
            };
            match outcome {
                Ok(()) => report.restored.push(path.clone()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to restore snapshot");
                    report.failed.push((path.clone(), e));
                }
            }
        }

        for dir in scope.created_dirs.iter().rev() {
            if !self.fs.exists(dir) {
                continue;
            }
            if let Err(e) = self.fs.remove_dir(dir) {
                warn!(dir = %dir.display(), error = %e, "Could not remove directory created by transaction");
            }
        }

        debug!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "Backup scope restored"
        );
        report
    }

    /// Release the scope without touching the filesystem.
    pub fn discard(&self, scope: BackupScope) {
        debug!(snapshots = scope.len(), "Backup scope discarded");
    }
}
