//! A transaction cut short by a panic or a shutdown request restores the tree.
//! The shutdown flag is process-wide, so these run serially.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serial_test::serial;

use kb_migrate::fs_ops::FileStat;
use kb_migrate::{
    Error, FileOperation, FileSystem, ManagedRoot, MemoryFileSystem, OperationBatch,
    TransactionalMigrationEngine, TxState, shutdown,
};

#[derive(Clone, Copy)]
enum Trip {
    Panic,
    Shutdown,
}

/// Memory filesystem that panics on, or requests shutdown after, the n-th rename.
struct Tripwire {
    inner: MemoryFileSystem,
    renames: AtomicUsize,
    trip_on: usize,
    action: Trip,
}

impl Tripwire {
    fn new(trip_on: usize, action: Trip) -> Self {
        Self {
            inner: MemoryFileSystem::new(),
            renames: AtomicUsize::new(0),
            trip_on,
            action,
        }
    }
}

impl FileSystem for Tripwire {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.inner.write(path, contents)
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let n = self.renames.fetch_add(1, Ordering::SeqCst) + 1;
        if n != self.trip_on {
            return self.inner.rename(from, to);
        }
        match self.action {
            Trip::Panic => panic!("simulated crash renaming {}", from.display()),
            Trip::Shutdown => {
                let out = self.inner.rename(from, to);
                shutdown::request();
                out
            }
        }
    }
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }
    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir(path)
    }
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.inner.stat(path)
    }
    fn list_files_recursive(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list_files_recursive(root)
    }
}

fn read(fs: &dyn FileSystem, p: &str) -> String {
    String::from_utf8(fs.read(Path::new(p)).unwrap()).unwrap()
}

fn write_then_move() -> OperationBatch {
    OperationBatch::new(vec![
        FileOperation::write("x.md", "C1"),
        FileOperation::move_file("y.md", "z.md"),
    ])
}

#[test]
#[serial]
fn panic_mid_batch_restores_the_tree() {
    shutdown::reset();
    // Rename 1 publishes x.md; rename 2 is the move.
    let fs = Arc::new(Tripwire::new(2, Trip::Panic));
    fs.inner.insert_file("/kb/y.md", "why");
    let engine = TransactionalMigrationEngine::new(fs.clone());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        engine.apply(&ManagedRoot::new("/kb"), write_then_move())
    }));

    assert!(outcome.is_err(), "the simulated crash should unwind through apply");
    assert!(!fs.exists(Path::new("/kb/x.md")));
    assert!(!fs.exists(Path::new("/kb/z.md")));
    assert_eq!(read(fs.as_ref(), "/kb/y.md"), "why");
}

#[test]
#[serial]
fn shutdown_between_operations_rolls_back() {
    shutdown::reset();
    let fs = Arc::new(Tripwire::new(1, Trip::Shutdown));
    fs.inner.insert_file("/kb/y.md", "why");

    let result = TransactionalMigrationEngine::new(fs.clone()).apply(&ManagedRoot::new("/kb"), write_then_move());
    shutdown::reset();

    assert!(!result.committed);
    assert_eq!(result.final_state, TxState::Failed);
    assert_eq!(result.applied_operations.len(), 1);
    let err = result.error.expect("error");
    assert!(err.rollback_clean(), "{err}");
    assert!(matches!(err, Error::PartialFailure { ref cause, .. } if matches!(**cause, Error::Interrupted)));
    assert!(!fs.exists(Path::new("/kb/x.md")));
    assert_eq!(read(fs.as_ref(), "/kb/y.md"), "why");
}

#[test]
#[serial]
fn shutdown_before_link_rewrite_rolls_back_the_move() {
    shutdown::reset();
    let fs = Arc::new(Tripwire::new(1, Trip::Shutdown));
    fs.inner.insert_file("/kb/a.md", "# A\n");
    fs.inner.insert_file("/kb/b.md", "[a](a.md)\n");

    let result = TransactionalMigrationEngine::new(fs.clone()).apply(
        &ManagedRoot::new("/kb"),
        OperationBatch::new(vec![FileOperation::move_file("a.md", "sub/a.md")]),
    );
    shutdown::reset();

    assert!(!result.committed);
    assert_eq!(result.rewritten_links, 0);
    assert_eq!(read(fs.as_ref(), "/kb/a.md"), "# A\n");
    assert_eq!(read(fs.as_ref(), "/kb/b.md"), "[a](a.md)\n");
    assert!(!fs.exists(Path::new("/kb/sub/a.md")));
    assert!(!fs.exists(Path::new("/kb/sub")));
}

#[test]
#[serial]
fn pending_shutdown_stops_a_batch_before_it_starts() {
    shutdown::request();
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert_file("/kb/y.md", "why");

    let result = TransactionalMigrationEngine::new(fs.clone()).apply(&ManagedRoot::new("/kb"), write_then_move());
    shutdown::reset();

    assert!(!result.committed);
    assert!(result.applied_operations.is_empty());
    assert!(!fs.exists(Path::new("/kb/x.md")));
    assert_eq!(read(fs.as_ref(), "/kb/y.md"), "why");
}
