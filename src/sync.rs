//! Install/update planning.
//!
//! Diffs a source bundle against a consumer tree and produces the batch that
//! brings the tree in line. A file that only changed path is emitted as a
//! Move, not a delete plus write, so the engine rewrites links to it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{FileOperation, OperationBatch};
use crate::errors::Result;
use crate::fs_ops::{FileSystem, io_error_with_help};
use crate::integrity::{IntegrityVerifier, Manifest};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Delete target files that the source no longer has.
    pub prune: bool,
    /// Root-relative paths ignored on both sides.
    pub exclude: Vec<String>,
}

/// Order: moves, then writes, then deletes; each group sorted by path.
pub fn plan_sync(
    fs: Arc<dyn FileSystem>,
    source_root: &Path,
    target_root: &Path,
    options: &SyncOptions,
) -> Result<OperationBatch> {
    let verifier = IntegrityVerifier::new(fs.clone()).with_exclusions(options.exclude.iter().cloned());
    let source = verifier.build_manifest(source_root)?;
    let target = if fs.exists(target_root) {
        verifier.build_manifest(target_root)?
    } else {
        debug!(target = %target_root.display(), "Target does not exist yet; planning a fresh install");
        Manifest::new(Vec::new())
    };

    let source_paths: BTreeSet<&str> = source.entries.iter().map(|e| e.path.as_str()).collect();

    // Candidates for rename detection: target-only files and source-only files, by digest.
    let mut orphans_by_digest: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in target.entries.iter().filter(|e| !source_paths.contains(e.path.as_str())) {
        orphans_by_digest.entry(e.digest.as_str()).or_default().push(e.path.as_str());
    }
    let mut arrivals_by_digest: HashMap<&str, usize> = HashMap::new();
    for e in source.entries.iter().filter(|e| target.entry(&e.path).is_none()) {
        *arrivals_by_digest.entry(e.digest.as_str()).or_default() += 1;
    }

    let mut moves = Vec::new();
    let mut writes = Vec::new();
    let mut consumed: BTreeSet<&str> = BTreeSet::new();

    for s in &source.entries {
        match target.entry(&s.path) {
            Some(t) if t.digest == s.digest => {}
            Some(_) => writes.push(write_from_source(fs.as_ref(), source_root, &s.path)?),
            None => {
                let unique_rename = arrivals_by_digest.get(s.digest.as_str()) == Some(&1)
                    && orphans_by_digest
                        .get(s.digest.as_str())
                        .is_some_and(|found| found.len() == 1);
                if unique_rename {
                    let from = orphans_by_digest[s.digest.as_str()][0];
                    consumed.insert(from);
                    moves.push(FileOperation::move_file(from, s.path.as_str()));
                } else {
                    writes.push(write_from_source(fs.as_ref(), source_root, &s.path)?);
                }
            }
        }
    }

    let deletes: Vec<FileOperation> = if options.prune {
        target
            .entries
            .iter()
            .map(|e| e.path.as_str())
            .filter(|p| !source_paths.contains(p) && !consumed.contains(p))
            .map(FileOperation::delete)
            .collect()
    } else {
        Vec::new()
    };

    moves.sort_by(|a, b| a.target().cmp(&b.target()));
    info!(
        moves = moves.len(),
        writes = writes.len(),
        deletes = deletes.len(),
        "Planned sync"
    );

    let mut ops = moves;
    ops.extend(writes);
    ops.extend(deletes);
    Ok(OperationBatch::new(ops))
}

fn write_from_source(fs: &dyn FileSystem, source_root: &Path, rel: &str) -> Result<FileOperation> {
    let abs = source_root.join(rel);
    let bytes = fs
        .read(&abs)
        .map_err(io_error_with_help("read source file", &abs))?;
    Ok(FileOperation::Write {
        target: PathBuf::from(rel),
        content: bytes,
    })
}
