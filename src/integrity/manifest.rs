//! Manifest model and its JSON form.
//!
//! ```json
//! {
//!   "formatVersion": 1,
//!   "totalFiles": 2,
//!   "entries": [
//!     { "path": "docs/a.md", "algorithm": "sha256", "digest": "…", "size": 12 }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::fs_ops::{AtomicWriter, FileSystem, io_error_with_help};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of a lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
        }
    }

    pub fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Root-relative, `/`-separated.
    pub path: String,
    pub algorithm: DigestAlgorithm,
    pub digest: String,
    pub size: u64,
}

impl ManifestEntry {
    pub fn for_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        let algorithm = DigestAlgorithm::Sha256;
        Self {
            path: path.into(),
            algorithm,
            digest: algorithm.digest_hex(bytes),
            size: bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    pub format_version: u32,
    pub total_files: usize,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Sorts entries by path and fills in the header fields.
    pub fn new(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            format_version: FORMAT_VERSION,
            total_files: entries.len(),
            entries,
        }
    }

    /// Binary search; a manifest read from disk may be unsorted, and then
    /// a miss is confirmed by a linear scan.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        match self.entries.binary_search_by(|e| e.path.as_str().cmp(path)) {
            Ok(i) => Some(&self.entries[i]),
            Err(_) if self.entries.is_sorted_by(|a, b| a.path <= b.path) => None,
            Err(_) => self.entries.iter().find(|e| e.path == path),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Manifest(format!("cannot serialize manifest: {e}")))?;
        text.push('\n');
        Ok(text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Manifest(format!("cannot parse manifest: {e}")))
    }

    /// Structural problems, one message each. Empty means well-formed.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.format_version != FORMAT_VERSION {
            problems.push(format!(
                "unsupported formatVersion {} (expected {FORMAT_VERSION})",
                self.format_version
            ));
        }
        if self.total_files != self.entries.len() {
            problems.push(format!(
                "totalFiles is {} but the manifest lists {} entries",
                self.total_files,
                self.entries.len()
            ));
        }
        for pair in self.entries.windows(2) {
            if pair[0].path == pair[1].path {
                problems.push(format!("duplicate entry '{}'", pair[1].path));
            } else if pair[0].path > pair[1].path {
                problems.push(format!(
                    "entries not sorted: '{}' listed after '{}'",
                    pair[1].path, pair[0].path
                ));
            }
        }
        for e in &self.entries {
            if !is_clean_relative(&e.path) {
                problems.push(format!("entry path '{}' is not a clean relative path", e.path));
            }
            let hex_ok = e.digest.len() == e.algorithm.hex_len()
                && e.digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
            if !hex_ok {
                problems.push(format!(
                    "entry '{}' has a malformed {} digest",
                    e.path,
                    e.algorithm.as_str()
                ));
            }
        }
        problems
    }
}

fn is_clean_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Persist `manifest` at `path` through the atomic writer.
pub fn write_manifest(fs: &dyn FileSystem, path: &Path, manifest: &Manifest) -> Result<()> {
    let text = manifest.to_json()?;
    AtomicWriter::new(fs).write_file_atomic(path, text.as_bytes())
}

pub fn read_manifest(fs: &dyn FileSystem, path: &Path) -> Result<Manifest> {
    let bytes = fs.read(path).map_err(io_error_with_help("read manifest", path))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::Manifest(format!("{} is not UTF-8", path.display())))?;
    Manifest::from_json(&text)
}
