//! Startup reconciliation.
//! Removes temp files that a crashed atomic write left next to user content.
//! The CLI runs this before every `apply` so an interrupted run self-heals.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::fs_ops::{FileSystem, io_error_with_help, is_orphan_temp};

/// Delete every `.kb_migrate.*.tmp` under `root`. Returns the paths removed.
/// A missing root is not an error; a file that cannot be removed is logged and skipped.
pub fn cleanup_orphan_temps(fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
    if !fs.exists(root) {
        return Ok(Vec::new());
    }
    let files = fs
        .list_files_recursive(root)
        .map_err(io_error_with_help("list files for orphan cleanup", root))?;

    let mut removed = Vec::new();
    for p in files.into_iter().filter(|p| is_orphan_temp(p)) {
        match fs.remove_file(&p) {
            Ok(()) => {
                debug!(path = %p.display(), "Removed orphan temp file");
                removed.push(p);
            }
            Err(e) => warn!(error = %e, path = %p.display(), "Failed to remove orphan temp file"),
        }
    }
    Ok(removed)
}
