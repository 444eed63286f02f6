//! Filesystem capability used by every other module.
//!
//! The engine never touches `std::fs` directly: it is handed an
//! `Arc<dyn FileSystem>` at construction time. `OsFileSystem` is the real
//! implementation; `MemoryFileSystem` and `FaultInjectingFileSystem` live
//! next to it for previews and tests.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;
use walkdir::WalkDir;

use super::util::fsync_dir;

/// Subset of metadata the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

/// Primitive, synchronous filesystem operations.
///
/// Implementations report failures as plain `io::Error`; callers attach the
/// operation and path (see `io_error_with_help`).
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Create or truncate `path` and write `contents` in full.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Rename a file, replacing any existing file at `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    /// Every regular file below `root`, sorted.
    fn list_files_recursive(&self, root: &Path) -> io::Result<Vec<PathBuf>>;

    fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).map(|s| s.is_dir).unwrap_or(false)
    }
}

/// `FileSystem` backed by the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        f.write_all(contents)?;
        // Data must be durable before any rename publishes it.
        f.sync_all()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // Windows: RenameFile doesn't overwrite.
        #[cfg(windows)]
        if to.exists() {
            if let Err(e) = fs::remove_file(to) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e);
                }
            }
        }

        fs::rename(from, to)?;

        // Persist the rename; an fsync failure here must not turn a completed rename into an error.
        if let Some(parent) = to.parent() {
            if let Err(e) = fsync_dir(parent) {
                trace!(error = %e, dir = %parent.display(), "directory fsync after rename failed");
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    fn list_files_recursive(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        // Surface a missing root as NotFound instead of an empty listing.
        fs::metadata(root)?;
        let mut out = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop while walking tree"))
            })?;
            if entry.file_type().is_file() {
                out.push(entry.into_path());
            }
        }
        out.sort();
        Ok(out)
    }
}
