//! A failure at any point of a transaction leaves the real tree exactly as it was.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_fs::TempDir;
use assert_fs::prelude::*;
use walkdir::WalkDir;

use kb_migrate::fs_ops::FsOp;
use kb_migrate::{
    Error, FaultInjectingFileSystem, FileOperation, ManagedRoot, OperationBatch, OsFileSystem,
    TransactionalMigrationEngine, TxState,
};

/// Every file (with bytes) and directory under `root`, root-relative.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.expect("walk"))
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let bytes = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, bytes)
        })
        .collect()
}

fn seed() -> TempDir {
    let td = TempDir::new().unwrap();
    td.child("docs/a.md").write_str("# A\n").unwrap();
    td.child("docs/b.md").write_str("See [a](./a.md) and [y](../y.md).\n").unwrap();
    td.child("y.md").write_str("why\n").unwrap();
    td
}

fn batch() -> OperationBatch {
    OperationBatch::new(vec![
        FileOperation::write("new/x.md", "C1"),
        FileOperation::move_file("docs/a.md", "archive/a.md"),
        FileOperation::delete("y.md"),
    ])
}

#[test]
fn failing_any_step_restores_the_tree() {
    // Renames: x.md temp, the move, the rewrite of docs/b.md.
    // Writes: x.md temp, the rewrite temp. One delete.
    let faults = [
        (FsOp::Rename, 1),
        (FsOp::Rename, 2),
        (FsOp::Rename, 3),
        (FsOp::Write, 1),
        (FsOp::Write, 2),
        (FsOp::RemoveFile, 1),
    ];
    for (op, n) in faults {
        let td = seed();
        let before = snapshot(td.path());

        let fs = Arc::new(FaultInjectingFileSystem::new(OsFileSystem::new()));
        fs.fail_nth(op, n);
        let engine = TransactionalMigrationEngine::new(fs.clone());
        let result = engine.apply(&ManagedRoot::new(td.path()), batch());

        assert!(!result.committed, "{op:?} #{n} should fail the batch");
        assert_eq!(result.final_state, TxState::Failed);
        let err = result.error.expect("error set on failure");
        assert!(matches!(err, Error::PartialFailure { .. }), "{err}");
        assert!(err.rollback_clean(), "{err}");
        assert_eq!(snapshot(td.path()), before, "tree changed after {op:?} #{n} failed");
    }
}

#[test]
fn the_same_batch_commits_without_faults() {
    let td = seed();
    let fs = Arc::new(OsFileSystem::new());
    let result = TransactionalMigrationEngine::new(fs).apply(&ManagedRoot::new(td.path()), batch());

    assert!(result.committed, "{:?}", result.error);
    td.child("new/x.md").assert("C1");
    td.child("archive/a.md").assert("# A\n");
    td.child("docs/a.md").assert(predicates::path::missing());
    td.child("y.md").assert(predicates::path::missing());
    // The deleted target is reported, not rewritten.
    td.child("docs/b.md")
        .assert("See [a](./../archive/a.md) and [y](../y.md).\n");
    assert_eq!(result.link_errors.len(), 1);
    assert!(matches!(result.link_errors[0], Error::LinkResolution { .. }));
}

#[test]
fn failed_move_removes_the_earlier_write() {
    let td = TempDir::new().unwrap();
    td.child("y.md").write_str("y").unwrap();

    let fs = Arc::new(FaultInjectingFileSystem::new(OsFileSystem::new()));
    fs.fail_on_path(FsOp::Rename, "z.md");
    let engine = TransactionalMigrationEngine::new(fs.clone());
    let result = engine.apply(
        &ManagedRoot::new(td.path()),
        OperationBatch::new(vec![
            FileOperation::write("x.md", "C1"),
            FileOperation::move_file("y.md", "z.md"),
        ]),
    );

    assert!(!result.committed);
    assert_eq!(result.applied_operations, vec![FileOperation::write("x.md", "C1")]);
    td.child("x.md").assert(predicates::path::missing());
    td.child("y.md").assert("y");
    td.child("z.md").assert(predicates::path::missing());
}

#[test]
fn pre_existing_file_gets_its_bytes_back() {
    let td = TempDir::new().unwrap();
    td.child("x.md").write_str("original").unwrap();
    td.child("y.md").write_str("y").unwrap();

    let fs = Arc::new(FaultInjectingFileSystem::new(OsFileSystem::new()));
    fs.fail_on_path(FsOp::RemoveFile, "y.md");
    let result = TransactionalMigrationEngine::new(fs).apply(
        &ManagedRoot::new(td.path()),
        OperationBatch::new(vec![FileOperation::write("x.md", "C1"), FileOperation::delete("y.md")]),
    );

    assert!(!result.committed);
    td.child("x.md").assert("original");
    td.child("y.md").assert("y");
}

#[test]
fn validation_failure_touches_nothing() {
    let td = seed();
    let before = snapshot(td.path());
    let fs = Arc::new(FaultInjectingFileSystem::new(OsFileSystem::new()));
    let engine = TransactionalMigrationEngine::new(fs.clone());

    let result = engine.apply(
        &ManagedRoot::new(td.path()),
        OperationBatch::new(vec![
            FileOperation::write("new/x.md", "C1"),
            FileOperation::move_file("docs/a.md", "docs/b.md"),
        ]),
    );

    assert!(matches!(result.error, Some(Error::Validation(_))), "{:?}", result.error);
    assert!(result.applied_operations.is_empty());
    for op in [FsOp::Write, FsOp::Rename, FsOp::CreateDir, FsOp::RemoveFile, FsOp::RemoveDir] {
        assert_eq!(fs.calls(op), 0, "{op:?} was called");
    }
    assert_eq!(snapshot(td.path()), before);
}
