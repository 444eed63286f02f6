//! Batch validation by simulation.
//!
//! The batch is played against an in-memory view of the pre-batch tree.
//! Anything that would fail or silently clobber on disk is rejected here, so
//! a bad batch never opens a backup scope. The simulated end state also tells
//! the link pass where every original document ended up.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::links::{ManagedTree, to_slash};

use super::batch::{FileOperation, OperationBatch, check_relative, normalize};

#[derive(Debug, Clone)]
struct Entry {
    /// Pre-batch path whose document this file still is.
    identity: Option<PathBuf>,
    /// Bytes were supplied by a Write in this batch.
    written: bool,
    /// Placed here by this batch (write or move).
    arrived: bool,
}

/// A validated batch plus its simulated outcome.
#[derive(Debug)]
pub struct BatchPlan {
    operations: Vec<FileOperation>,
    final_state: BTreeMap<PathBuf, Entry>,
    locations: HashMap<PathBuf, PathBuf>,
}

impl BatchPlan {
    pub fn simulate(tree: &ManagedTree, batch: OperationBatch) -> Result<Self> {
        let mut state: BTreeMap<PathBuf, Entry> = tree
            .files()
            .map(|p| {
                let entry = Entry {
                    identity: Some(p.clone()),
                    written: false,
                    arrived: false,
                };
                (p.clone(), entry)
            })
            .collect();

        let mut operations = Vec::with_capacity(batch.len());
        for (i, op) in batch.into_iter().enumerate() {
            let fail = |msg: String| Error::Validation(format!("operation #{} ({}): {msg}", i + 1, op.describe()));

            for p in op.touched_paths() {
                check_relative(p).map_err(|e| match e {
                    Error::Validation(m) => fail(m),
                    other => other,
                })?;
            }

            let op = match op {
                FileOperation::Write { ref target, ref content } => {
                    let target = normalize(target);
                    check_slot(&state, &target).map_err(&fail)?;
                    let identity = match state.get(&target) {
                        Some(existing) if existing.arrived => {
                            return Err(fail(format!(
                                "would overwrite '{}', which an earlier operation in this batch produced",
                                to_slash(&target)
                            )));
                        }
                        Some(existing) => existing.identity.clone(),
                        // Deleted earlier in the batch and recreated in place:
                        // links to the old file still resolve to this one.
                        None if tree.contains_file(&target) && !has_identity(&state, &target) => {
                            Some(target.clone())
                        }
                        None => None,
                    };
                    state.insert(
                        target.clone(),
                        Entry {
                            identity,
                            written: true,
                            arrived: true,
                        },
                    );
                    FileOperation::Write {
                        target,
                        content: content.clone(),
                    }
                }
                FileOperation::Move { ref source, ref target } => {
                    let source = normalize(source);
                    let target = normalize(target);
                    if source == target {
                        return Err(fail("moves a file onto itself".into()));
                    }
                    if !state.contains_key(&source) {
                        return Err(fail(missing_source(&state, &source)));
                    }
                    if let Some(existing) = state.get(&target) {
                        let why = if existing.arrived {
                            "an earlier operation in this batch already produced it"
                        } else {
                            "the target already exists"
                        };
                        return Err(fail(format!(
                            "name collision at '{}': {why}",
                            to_slash(&target)
                        )));
                    }
                    check_slot(&state, &target).map_err(&fail)?;
                    if let Some(mut entry) = state.remove(&source) {
                        entry.arrived = true;
                        state.insert(target.clone(), entry);
                    }
                    FileOperation::Move { source, target }
                }
                FileOperation::Delete { ref source } => {
                    let source = normalize(source);
                    if state.remove(&source).is_none() {
                        return Err(fail(missing_source(&state, &source)));
                    }
                    FileOperation::Delete { source }
                }
            };
            operations.push(op);
        }

        let locations = state
            .iter()
            .filter_map(|(path, e)| e.identity.clone().map(|id| (id, path.clone())))
            .collect();
        Ok(Self {
            operations,
            final_state: state,
            locations,
        })
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    /// True when some document changes location or disappears, which is
    /// what makes links go stale.
    pub fn relocates(&self) -> bool {
        self.operations
            .iter()
            .any(|op| !matches!(op, FileOperation::Write { .. }))
    }

    /// Where the document originally at `original` lives after the batch.
    /// `None` when it was deleted.
    pub fn final_location(&self, original: &Path) -> Option<&Path> {
        self.locations.get(original).map(PathBuf::as_path)
    }

    /// Files whose bytes are original content after the batch, as
    /// `(final path, original path)`. Written files are excluded.
    pub fn carried_documents(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.final_state.iter().filter_map(|(path, e)| match &e.identity {
            Some(orig) if !e.written => Some((path.as_path(), orig.as_path())),
            _ => None,
        })
    }
}

/// A file cannot be placed where a directory is, or below an existing file.
fn check_slot(state: &BTreeMap<PathBuf, Entry>, target: &Path) -> std::result::Result<(), String> {
    if state
        .range(target.to_path_buf()..)
        .next()
        .is_some_and(|(k, _)| k != target && k.starts_with(target))
    {
        return Err(format!("'{}' is a directory", to_slash(target)));
    }
    if let Some(file) = target.ancestors().skip(1).find(|a| state.contains_key(*a)) {
        return Err(format!(
            "parent '{}' is a file, not a directory",
            to_slash(file)
        ));
    }
    Ok(())
}

fn has_identity(state: &BTreeMap<PathBuf, Entry>, original: &Path) -> bool {
    state.values().any(|e| e.identity.as_deref() == Some(original))
}

fn missing_source(state: &BTreeMap<PathBuf, Entry>, source: &Path) -> String {
    let is_dir = state
        .range(source.to_path_buf()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(source));
    if is_dir {
        format!("'{}' is a directory; only files can be moved or deleted", to_slash(source))
    } else {
        format!(
            "source '{}' does not exist at this point in the batch",
            to_slash(source)
        )
    }
}
