//! Bundle integrity: manifests of content digests and verification against them.

mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs_ops::{FileSystem, io_error_with_help, is_internal_artifact};
use crate::links::to_slash;

pub use manifest::{
    DigestAlgorithm, FORMAT_VERSION, Manifest, ManifestEntry, read_manifest, write_manifest,
};

/// A file present in both the manifest and the tree with different bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestMismatch {
    pub path: String,
    pub expected_digest: String,
    pub actual_digest: String,
    pub expected_size: u64,
    pub actual_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Listed in the manifest, absent on disk.
    pub missing: Vec<String>,
    /// On disk, absent from the manifest.
    pub unexpected: Vec<String>,
    pub corrupted: Vec<DigestMismatch>,
    /// Structural problems with the manifest itself.
    pub manifest_errors: Vec<String>,
}

impl VerificationReport {
    pub fn is_intact(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.corrupted.is_empty()
            && self.manifest_errors.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.missing.len() + self.unexpected.len() + self.corrupted.len() + self.manifest_errors.len()
    }
}

pub struct IntegrityVerifier {
    fs: Arc<dyn FileSystem>,
    excluded: BTreeSet<String>,
}

impl IntegrityVerifier {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            excluded: BTreeSet::new(),
        }
    }

    /// Root-relative paths (`/`-separated) left out of manifests, e.g. the
    /// bundle's own `manifest.json`.
    pub fn with_exclusions<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(
            paths
                .into_iter()
                .map(|s| s.into().trim_start_matches("./").to_string()),
        );
        self
    }

    /// Digest every file under `root`, in parallel. Entries come back sorted.
    pub fn build_manifest(&self, root: &Path) -> Result<Manifest> {
        let listed = self
            .fs
            .list_files_recursive(root)
            .map_err(io_error_with_help("list bundle files", root))?;

        let files: Vec<(PathBuf, String)> = listed
            .into_iter()
            .filter(|p| !is_internal_artifact(p))
            .filter_map(|p| {
                let rel = to_slash(p.strip_prefix(root).ok()?);
                (!self.excluded.contains(&rel)).then_some((p, rel))
            })
            .collect();

        let fs = self.fs.as_ref();
        let entries = files
            .par_iter()
            .map(|(abs, rel)| -> Result<ManifestEntry> {
                let bytes = fs.read(abs).map_err(io_error_with_help("read file for digest", abs))?;
                Ok(ManifestEntry::for_bytes(rel.clone(), &bytes))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(root = %root.display(), files = entries.len(), "Built manifest");
        Ok(Manifest::new(entries))
    }

    /// Diff a fresh manifest of `root` against `manifest`.
    pub fn verify(&self, root: &Path, manifest: &Manifest) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            manifest_errors: manifest.validate(),
            ..Default::default()
        };
        for problem in &report.manifest_errors {
            warn!(problem = %problem, "Manifest is malformed");
        }

        let actual = self.build_manifest(root)?;
        let expected: BTreeMap<&str, &ManifestEntry> =
            manifest.entries.iter().map(|e| (e.path.as_str(), e)).collect();
        let found: BTreeMap<&str, &ManifestEntry> =
            actual.entries.iter().map(|e| (e.path.as_str(), e)).collect();

        for (path, exp) in &expected {
            match found.get(path) {
                None => report.missing.push(path.to_string()),
                Some(act) if act.digest != exp.digest || act.size != exp.size => {
                    report.corrupted.push(DigestMismatch {
                        path: path.to_string(),
                        expected_digest: exp.digest.clone(),
                        actual_digest: act.digest.clone(),
                        expected_size: exp.size,
                        actual_size: act.size,
                    })
                }
                Some(_) => {}
            }
        }
        report.unexpected = found
            .keys()
            .filter(|p| !expected.contains_key(*p))
            .map(|p| p.to_string())
            .collect();

        if report.is_intact() {
            info!(root = %root.display(), files = actual.total_files, "Bundle verified intact");
        } else {
            warn!(
                root = %root.display(),
                missing = report.missing.len(),
                unexpected = report.unexpected.len(),
                corrupted = report.corrupted.len(),
                manifest_errors = report.manifest_errors.len(),
                "Bundle verification found problems"
            );
        }
        Ok(report)
    }
}
