//! Atomic single-file writer.
//! - Writes into a hidden sibling temp file, then renames it over the target.
//! - The temp file lives in the target's directory so the rename never crosses a filesystem.
//! - Cleanup is owned by a guard: the temp file is removed on every exit path unless
//!   the rename published it.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::helpers::io_error_with_help;
use super::service::FileSystem;
use super::util::unique_temp_path;
use crate::errors::Result;

/// Owns a temp path until it is renamed into place.
struct TempFile<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
    armed: bool,
}

impl<'a> TempFile<'a> {
    fn new(fs: &'a dyn FileSystem, path: PathBuf) -> Self {
        Self { fs, path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.fs.exists(&self.path) {
            return;
        }
        // Best-effort: a stale temp file is harmless and picked up by recover::cleanup_orphan_temps.
        if let Err(e) = self.fs.remove_file(&self.path) {
            warn!(error = %e, tmp = %self.path.display(), "Failed to remove temporary file");
        }
    }
}

/// Writes whole files so that readers see either the old or the new bytes.
#[derive(Clone, Copy)]
pub struct AtomicWriter<'a> {
    fs: &'a dyn FileSystem,
    dry_run: bool,
}

impl<'a> AtomicWriter<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs, dry_run: false }
    }

    /// In dry-run mode nothing is written; every call reports success.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Replace `path` with `content` in one visible step.
    pub fn write_file_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        if self.dry_run {
            info!(path = %path.display(), bytes = content.len(), "dry-run: would write file");
            return Ok(());
        }

        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        self.fs
            .create_dir_all(parent)
            .map_err(io_error_with_help("create parent directory", parent))?;

        let tmp = TempFile::new(self.fs, unique_temp_path(parent));
        self.fs
            .write(tmp.path(), content)
            .map_err(io_error_with_help("write temporary file", tmp.path()))?;
        self.fs
            .rename(tmp.path(), path)
            .map_err(io_error_with_help("rename temporary file into place", path))?;
        tmp.disarm();

        debug!(path = %path.display(), bytes = content.len(), "Wrote file atomically");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::fs_ops::{FaultInjectingFileSystem, FsOp, MemoryFileSystem, OsFileSystem, is_internal_artifact};
    use tempfile::tempdir;

    #[test]
    fn creates_parents_and_leaves_no_temp() {
        let td = tempdir().unwrap();
        let target = td.path().join("docs/guide/intro.md");
        let fs = OsFileSystem::new();
        AtomicWriter::new(&fs).write_file_atomic(&target, b"# Intro\n").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"# Intro\n");
        for entry in std::fs::read_dir(target.parent().unwrap()).unwrap().flatten() {
            assert!(!is_internal_artifact(&entry.path()), "tmp left behind: {:?}", entry.path());
        }
    }

    #[test]
    fn replaces_existing_content() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/kb/a.md", "old");
        AtomicWriter::new(&fs).write_file_atomic(Path::new("/kb/a.md"), b"new").unwrap();
        assert_eq!(fs.read(Path::new("/kb/a.md")).unwrap(), b"new");
    }

    #[test]
    fn rename_failure_cleans_temp_and_keeps_old_bytes() {
        let fs = FaultInjectingFileSystem::new(MemoryFileSystem::new());
        fs.inner().insert_file("/kb/a.md", "old");
        fs.fail_nth(FsOp::Rename, 1);
        let err = AtomicWriter::new(&fs)
            .write_file_atomic(Path::new("/kb/a.md"), b"new")
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(fs.read(Path::new("/kb/a.md")).unwrap(), b"old");
        let files = fs.list_files_recursive(Path::new("/kb")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/kb/a.md")]);
    }

    #[test]
    fn write_failure_reports_temp_path() {
        let fs = FaultInjectingFileSystem::new(MemoryFileSystem::new());
        fs.inner().insert_file("/kb/a.md", "old");
        fs.fail_nth(FsOp::Write, 1);
        let err = AtomicWriter::new(&fs)
            .write_file_atomic(Path::new("/kb/a.md"), b"new")
            .unwrap_err();
        assert!(err.to_string().contains("write temporary file"));
        assert_eq!(fs.read(Path::new("/kb/a.md")).unwrap(), b"old");
    }

    #[test]
    fn dry_run_touches_nothing() {
        let fs = FaultInjectingFileSystem::new(MemoryFileSystem::new());
        AtomicWriter::new(&fs)
            .with_dry_run(true)
            .write_file_atomic(Path::new("/kb/new/a.md"), b"x")
            .unwrap();
        assert_eq!(fs.calls(FsOp::Write), 0);
        assert_eq!(fs.calls(FsOp::CreateDir), 0);
        assert!(!fs.exists(Path::new("/kb/new/a.md")));
    }
}
