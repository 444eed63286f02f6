//! Transactional migration engine.
//!
//! `apply` validates a batch by simulation, snapshots everything it will
//! touch, runs the operations in order, rewrites links that the moves made
//! stale, and either commits or restores every snapshot.
//!
//! State flow: Idle -> BackingUp -> Applying -> LinkRewriting -> Committed,
//! or from any non-terminal state -> RollingBack -> Failed. A requested
//! shutdown counts as a failure. A transaction dropped before reaching a
//! terminal state (a panic unwinding through it) restores its snapshots.

mod batch;
mod plan;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::backup::{BackupScope, BackupService};
use crate::errors::{Error, Result};
use crate::fs_ops::{AtomicWriter, FileSystem, MemoryFileSystem, io_error_with_help, is_cross_device};
use crate::links::{LinkKind, LinkReference, ManagedTree, MarkdownLinkProcessor, apply_edits, to_slash};
use crate::shutdown;

pub use batch::{FileOperation, OperationBatch, OperationSpec};
pub use plan::BatchPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    BackingUp,
    Applying,
    LinkRewriting,
    Committed,
    RollingBack,
    Failed,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::Failed)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Idle => "idle",
            TxState::BackingUp => "backing-up",
            TxState::Applying => "applying",
            TxState::LinkRewriting => "link-rewriting",
            TxState::Committed => "committed",
            TxState::RollingBack => "rolling-back",
            TxState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The directory a transaction may touch, plus the document root that
/// `/`-prefixed links resolve against (relative to the managed root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRoot {
    path: PathBuf,
    doc_root: PathBuf,
}

impl ManagedRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc_root: PathBuf::new(),
        }
    }

    pub fn with_doc_root(mut self, doc_root: impl Into<PathBuf>) -> Self {
        self.doc_root = doc_root.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    /// Absolute path for a root-relative one.
    pub fn join(&self, rel: &Path) -> PathBuf {
        self.path.join(rel)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Run the batch against an in-memory copy and leave the real tree alone.
    pub dry_run: bool,
    /// Treat any link that cannot be rewritten as a failure.
    pub strict_links: bool,
    /// File extensions (without dot, case-insensitive) scanned for links.
    pub markdown_extensions: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            strict_links: false,
            markdown_extensions: vec!["md".into(), "markdown".into()],
        }
    }
}

impl EngineOptions {
    pub fn is_markdown(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.markdown_extensions
                    .iter()
                    .any(|m| m.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

/// Outcome of one `apply` call. `error` is set exactly when `committed` is false.
#[derive(Debug)]
pub struct TransactionResult {
    pub committed: bool,
    /// Operations that completed before commit or failure, in order.
    pub applied_operations: Vec<FileOperation>,
    pub error: Option<Error>,
    pub rewritten_links: usize,
    /// Root-relative documents whose link text changed.
    pub rewritten_files: Vec<PathBuf>,
    /// Links that could not be rewritten. Fatal only with `strict_links`.
    pub link_errors: Vec<Error>,
    pub final_state: TxState,
    pub dry_run: bool,
}

impl TransactionResult {
    fn rejected(error: Error, dry_run: bool) -> Self {
        Self {
            committed: false,
            applied_operations: Vec::new(),
            error: Some(error),
            rewritten_links: 0,
            rewritten_files: Vec::new(),
            link_errors: Vec::new(),
            final_state: TxState::Failed,
            dry_run,
        }
    }

    /// `Err` with the transaction error, or the committed result.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

pub struct TransactionalMigrationEngine {
    fs: Arc<dyn FileSystem>,
    options: EngineOptions,
}

impl TransactionalMigrationEngine {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run `batch` against `root` as a single all-or-nothing transaction.
    pub fn apply(&self, root: &ManagedRoot, batch: OperationBatch) -> TransactionResult {
        if self.options.dry_run {
            return self.preview(root, batch);
        }
        self.run_on(self.fs.as_ref(), root, batch)
    }

    fn preview(&self, root: &ManagedRoot, batch: OperationBatch) -> TransactionResult {
        let copy = match MemoryFileSystem::snapshot_of(self.fs.as_ref(), root.path()) {
            Ok(copy) => copy,
            Err(e) => return TransactionResult::rejected(e, true),
        };
        info!(root = %root.path().display(), "dry-run: previewing batch on an in-memory copy");
        let mut result = self.run_on(&copy, root, batch);
        result.dry_run = true;
        result
    }

    fn run_on(&self, fs: &dyn FileSystem, root: &ManagedRoot, batch: OperationBatch) -> TransactionResult {
        let dry_run = self.options.dry_run;
        let tree = match ManagedTree::scan(fs, root.path()) {
            Ok(tree) => tree,
            Err(e) => return TransactionResult::rejected(e, dry_run),
        };
        let plan = match BatchPlan::simulate(&tree, batch) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Batch rejected before any change");
                return TransactionResult::rejected(e, dry_run);
            }
        };
        debug!(
            operations = plan.operations().len(),
            files = tree.len(),
            "Batch validated"
        );
        Transaction::new(fs, root, &self.options).run(&tree, &plan)
    }
}

struct Transaction<'a> {
    fs: &'a dyn FileSystem,
    root: &'a ManagedRoot,
    options: &'a EngineOptions,
    backup: BackupService<'a>,
    writer: AtomicWriter<'a>,
    scope: BackupScope,
    state: TxState,
    /// Set once anything on disk may have changed.
    mutated: bool,
    applied: Vec<FileOperation>,
    rewritten_links: usize,
    rewritten_files: Vec<PathBuf>,
    link_errors: Vec<Error>,
}

impl<'a> Transaction<'a> {
    fn new(fs: &'a dyn FileSystem, root: &'a ManagedRoot, options: &'a EngineOptions) -> Self {
        let backup = BackupService::new(fs);
        let scope = backup.begin_scope();
        Self {
            fs,
            root,
            options,
            backup,
            writer: AtomicWriter::new(fs),
            scope,
            state: TxState::Idle,
            mutated: false,
            applied: Vec::new(),
            rewritten_links: 0,
            rewritten_files: Vec::new(),
            link_errors: Vec::new(),
        }
    }

    fn transition(&mut self, next: TxState) {
        debug!(from = %self.state, to = %next, "transaction state");
        self.state = next;
    }

    fn run(mut self, tree: &ManagedTree, plan: &BatchPlan) -> TransactionResult {
        match self.execute(tree, plan) {
            Ok(()) => self.commit(),
            Err(cause) => self.roll_back(cause),
        }
    }

    fn execute(&mut self, tree: &ManagedTree, plan: &BatchPlan) -> Result<()> {
        self.transition(TxState::BackingUp);
        for op in plan.operations() {
            for rel in op.touched_paths() {
                let abs = self.root.join(rel);
                self.backup.capture(&mut self.scope, &abs)?;
            }
        }

        self.transition(TxState::Applying);
        for op in plan.operations() {
            check_shutdown()?;
            self.apply_one(op)?;
            self.applied.push(op.clone());
        }

        self.transition(TxState::LinkRewriting);
        check_shutdown()?;
        if plan.relocates() {
            self.rewrite_links(tree, plan)?;
        }
        if self.options.strict_links && !self.link_errors.is_empty() {
            return Err(self.link_errors.remove(0));
        }
        Ok(())
    }

    fn apply_one(&mut self, op: &FileOperation) -> Result<()> {
        self.mutated = true;
        match op {
            FileOperation::Write { target, content } => {
                let abs = self.root.join(target);
                self.ensure_parent(&abs)?;
                self.writer.write_file_atomic(&abs, content)?;
                info!(path = %abs.display(), bytes = content.len(), "Wrote file");
            }
            FileOperation::Move { source, target } => {
                let src = self.root.join(source);
                let dst = self.root.join(target);
                self.ensure_parent(&dst)?;
                match self.fs.rename(&src, &dst) {
                    Ok(()) => info!(src = %src.display(), dest = %dst.display(), "Moved file"),
                    Err(e) if is_cross_device(&e) => {
                        warn!(src = %src.display(), dest = %dst.display(), "Rename crossed devices; copying instead");
                        let bytes = self
                            .fs
                            .read(&src)
                            .map_err(io_error_with_help("read source for cross-device move", &src))?;
                        self.writer.write_file_atomic(&dst, &bytes)?;
                        self.fs
                            .remove_file(&src)
                            .map_err(io_error_with_help("remove source after copy", &src))?;
                        info!(src = %src.display(), dest = %dst.display(), "Moved file by copy");
                    }
                    Err(e) => return Err(io_error_with_help("rename file", &src)(e)),
                }
            }
            FileOperation::Delete { source } => {
                let abs = self.root.join(source);
                self.fs
                    .remove_file(&abs)
                    .map_err(io_error_with_help("delete file", &abs))?;
                info!(path = %abs.display(), "Deleted file");
            }
        }
        Ok(())
    }

    fn ensure_parent(&mut self, abs: &Path) -> Result<()> {
        match abs.parent() {
            Some(parent) => self.backup.ensure_dir(&mut self.scope, parent),
            None => Ok(()),
        }
    }

    fn rewrite_links(&mut self, tree: &ManagedTree, plan: &BatchPlan) -> Result<()> {
        let processor = MarkdownLinkProcessor::new(tree).with_doc_root(self.root.doc_root());

        for (final_path, original) in plan.carried_documents() {
            if !self.options.is_markdown(final_path) {
                continue;
            }
            check_shutdown()?;
            let abs = self.root.join(final_path);
            let bytes = self
                .fs
                .read(&abs)
                .map_err(io_error_with_help("read document for link rewrite", &abs))?;
            // Non-UTF-8 documents are scanned lossily and never rewritten;
            // each stale link in them is reported instead.
            let (content, decodable) = match String::from_utf8(bytes) {
                Ok(s) => (s, true),
                Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), false),
            };

            let doc_moved = final_path != original;
            let mut edits = Vec::new();
            for link in processor.extract_links(original, &content) {
                let Some(resolved) = link.kind.resolved() else {
                    if let LinkKind::Unresolvable { reason } = &link.kind {
                        trace!(file = %to_slash(final_path), target = %link.raw_target, %reason, "Leaving dangling link untouched");
                    }
                    continue;
                };
                let new_target = if tree.contains_file(resolved) {
                    match plan.final_location(resolved) {
                        Some(p) => p.to_path_buf(),
                        None => {
                            self.record_link_error(final_path, &link, "target is deleted by this batch");
                            continue;
                        }
                    }
                } else {
                    resolved.to_path_buf()
                };
                if !doc_moved && new_target == resolved {
                    continue;
                }
                match processor.rewrite_link(&link, resolved, &new_target, final_path) {
                    Some(text) if text != link.raw_target && decodable => edits.push((link.span.clone(), text)),
                    Some(text) if text != link.raw_target => {
                        self.record_link_error(final_path, &link, "document is not valid UTF-8; link left as is")
                    }
                    Some(_) => {}
                    None => self.record_link_error(
                        final_path,
                        &link,
                        "new location is outside the document root",
                    ),
                }
            }
            if edits.is_empty() {
                continue;
            }

            self.backup.capture(&mut self.scope, &abs)?;
            let count = edits.len();
            let updated = apply_edits(&content, edits);
            self.writer.write_file_atomic(&abs, updated.as_bytes())?;
            info!(path = %abs.display(), links = count, "Rewrote links");
            self.rewritten_links += count;
            self.rewritten_files.push(final_path.to_path_buf());
        }
        Ok(())
    }

    fn record_link_error(&mut self, file: &Path, link: &LinkReference, reason: &str) {
        warn!(
            file = %to_slash(file),
            target = %link.raw_target,
            line = link.line_start,
            reason,
            "Link cannot be rewritten"
        );
        self.link_errors.push(Error::LinkResolution {
            file: to_slash(file),
            raw_target: link.raw_target.clone(),
            reason: reason.to_string(),
        });
    }

    fn commit(mut self) -> TransactionResult {
        let scope = std::mem::take(&mut self.scope);
        self.backup.discard(scope);
        self.transition(TxState::Committed);
        info!(
            operations = self.applied.len(),
            rewritten_links = self.rewritten_links,
            "Transaction committed"
        );
        self.finish(None)
    }

    fn roll_back(mut self, cause: Error) -> TransactionResult {
        self.transition(TxState::RollingBack);
        warn!(error = %cause, applied = self.applied.len(), "Rolling back transaction");
        let scope = std::mem::take(&mut self.scope);
        let restore_errors = if self.mutated {
            self.backup.restore_all(scope).into_errors()
        } else {
            self.backup.discard(scope);
            Vec::new()
        };
        if !restore_errors.is_empty() {
            error!(
                failures = restore_errors.len(),
                "Rollback incomplete; the tree needs manual attention"
            );
        }
        self.transition(TxState::Failed);
        self.finish(Some(Error::PartialFailure {
            cause: Box::new(cause),
            restore_errors,
        }))
    }

    fn finish(mut self, error: Option<Error>) -> TransactionResult {
        TransactionResult {
            committed: error.is_none(),
            applied_operations: std::mem::take(&mut self.applied),
            error,
            rewritten_links: self.rewritten_links,
            rewritten_files: std::mem::take(&mut self.rewritten_files),
            link_errors: std::mem::take(&mut self.link_errors),
            final_state: self.state,
            dry_run: false,
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_terminal() || !self.mutated {
            return;
        }
        error!(
            state = %self.state,
            applied = self.applied.len(),
            "Transaction abandoned before commit; restoring snapshots"
        );
        let scope = std::mem::take(&mut self.scope);
        let report = self.backup.restore_all(scope);
        if !report.is_complete() {
            error!(
                failures = report.failed.len(),
                "Rollback incomplete; the tree needs manual attention"
            );
        }
        self.state = TxState::Failed;
    }
}

fn check_shutdown() -> Result<()> {
    if shutdown::is_requested() {
        warn!("Shutdown requested; abandoning transaction");
        return Err(Error::Interrupted);
    }
    Ok(())
}
