//! Advisory lock per managed root.
//! Uses a sidecar lock file so only one process migrates a given tree at a time.
//!
//! Design:
//! - We lock by opening/holding `.kb_migrate.lock` inside the managed root.
//! - fs2 maps this to flock(LOCK_EX) on Unix and LockFileEx on Windows.
//!
//! Notes:
//! - The engine itself takes no locks; callers (the CLI) hold a `RootLock`
//!   around `apply` to serialize invocations.
//! - The lock is released when the guard is dropped.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::trace;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use super::util::ARTIFACT_PREFIX;

/// RAII guard held while the root lock is active.
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        // Best-effort: don't leave stale lock files in consumer repositories.
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn lock_file_path(root: &Path) -> PathBuf {
    root.join(format!("{ARTIFACT_PREFIX}lock"))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    opts.mode(0o600);
    opts.open(path)
}

/// Blocking acquire of the lock for `root`.
pub fn acquire_root_lock(root: &Path) -> io::Result<RootLock> {
    let path = lock_file_path(root);
    let start = Instant::now();
    let file = open_lock_file(&path)?;
    file.lock_exclusive()?;
    trace!(path = %path.display(), waited_ms = start.elapsed().as_millis() as u64, "root lock acquired");
    Ok(RootLock { file, path })
}

/// Non-blocking acquire. Returns Ok(None) if another holder has the lock.
pub fn try_acquire_root_lock(root: &Path) -> io::Result<Option<RootLock>> {
    let path = lock_file_path(root);
    let file = open_lock_file(&path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(RootLock { file, path })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_try_lock_is_contended_and_file_removed_on_drop() {
        let td = tempdir().unwrap();
        let guard = acquire_root_lock(td.path()).unwrap();
        assert!(guard.path().exists());
        assert!(try_acquire_root_lock(td.path()).unwrap().is_none());
        drop(guard);
        assert!(!lock_file_path(td.path()).exists());
        let again = try_acquire_root_lock(td.path()).unwrap();
        assert!(again.is_some());
    }
}
