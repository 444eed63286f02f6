//! Fault injection decorator.
//!
//! Wraps any `FileSystem` and makes selected calls fail with a synthetic
//! `io::Error`. Rules are matched by operation and, optionally, by a substring
//! of the path; a rule can let a number of matching calls through first.
//!
//! ```ignore
//! let fs = FaultInjectingFileSystem::new(MemoryFileSystem::new());
//! fs.fail_nth(FsOp::Rename, 2);          // second rename fails
//! fs.fail_on_path(FsOp::Write, "x.md");  // every write touching x.md fails
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::service::{FileStat, FileSystem};

/// Mutating and listing calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Read,
    Write,
    CreateDir,
    Rename,
    RemoveFile,
    RemoveDir,
    List,
}

#[derive(Debug)]
struct Rule {
    op: FsOp,
    path_contains: Option<String>,
    /// Matching calls to let through before failing.
    skip: usize,
    /// Remaining failures; `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct Faults {
    rules: Vec<Rule>,
    calls: HashMap<FsOp, usize>,
}

pub struct FaultInjectingFileSystem<F: FileSystem> {
    inner: F,
    faults: Mutex<Faults>,
}

impl<F: FileSystem> FaultInjectingFileSystem<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Fail the `n`-th (1-based) call of `op`, once.
    pub fn fail_nth(&self, op: FsOp, n: usize) {
        self.lock().rules.push(Rule {
            op,
            path_contains: None,
            skip: n.saturating_sub(1),
            remaining: Some(1),
        });
    }

    /// Fail every call of `op` whose path contains `needle`.
    pub fn fail_on_path(&self, op: FsOp, needle: impl Into<String>) {
        self.lock().rules.push(Rule {
            op,
            path_contains: Some(needle.into()),
            skip: 0,
            remaining: None,
        });
    }

    /// Drop all rules; call counters are kept.
    pub fn clear(&self) {
        self.lock().rules.clear();
    }

    /// Number of calls seen for `op` (failed ones included).
    pub fn calls(&self, op: FsOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self, op: FsOp, paths: &[&Path]) -> io::Result<()> {
        let mut faults = self.lock();
        *faults.calls.entry(op).or_insert(0) += 1;
        for rule in faults.rules.iter_mut() {
            if rule.op != op || rule.remaining == Some(0) {
                continue;
            }
            if let Some(needle) = &rule.path_contains {
                let hit = paths
                    .iter()
                    .any(|p| p.to_string_lossy().contains(needle.as_str()));
                if !hit {
                    continue;
                }
            }
            if rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            return Err(io::Error::other(format!(
                "injected fault: {:?} {}",
                op,
                shown.join(" -> ")
            )));
        }
        Ok(())
    }
}

impl<F: FileSystem> FileSystem for FaultInjectingFileSystem<F> {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.check(FsOp::Read, &[path])?;
        self.inner.read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.check(FsOp::Write, &[path])?;
        self.inner.write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::CreateDir, &[path])?;
        self.inner.create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(FsOp::Rename, &[from, to])?;
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::RemoveFile, &[path])?;
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::RemoveDir, &[path])?;
        self.inner.remove_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.inner.stat(path)
    }

    fn list_files_recursive(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        self.check(FsOp::List, &[root])?;
        self.inner.list_files_recursive(root)
    }
}
