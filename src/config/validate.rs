//! Config validation logic.
//! Verifies the managed root, canonicalizes it, and keeps the document root inside it.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info};

use super::types::Config;
use crate::errors::{Error, Result};

/// Validate `cfg` and rewrite its paths into canonical form:
/// an absolute managed root and a root-relative document root.
pub fn validate_and_normalize(cfg: &mut Config) -> Result<()> {
    ensure_dir_exists_and_is_dir(&cfg.managed_root, "managed_root")?;
    ensure_readable(&cfg.managed_root, "managed_root")?;

    let root = dunce::canonicalize(&cfg.managed_root).map_err(|e| {
        Error::Config(format!(
            "cannot resolve managed_root '{}': {e}",
            cfg.managed_root.display()
        ))
    })?;
    cfg.doc_root = normalize_doc_root(&root, &cfg.doc_root)?;
    cfg.managed_root = root;

    if cfg.markdown_extensions.is_empty() {
        return Err(Error::Config("markdown_extensions must list at least one extension".into()));
    }
    let manifest_ok = {
        let p = Path::new(&cfg.manifest_name);
        p.components().count() == 1 && matches!(p.components().next(), Some(Component::Normal(_)))
    };
    if !manifest_ok {
        return Err(Error::Config(format!(
            "manifest_name must be a plain file name, got '{}'",
            cfg.manifest_name
        )));
    }

    info!(
        root = %cfg.managed_root.display(),
        doc_root = %cfg.doc_root.display(),
        log_file = %cfg
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".into()),
        "Config validated"
    );
    Ok(())
}

/// Ensure path exists and is a directory; emit clear errors with path context.
fn ensure_dir_exists_and_is_dir(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        error!("{name} does not exist: {}", path.display());
        return Err(Error::Config(format!("{name} does not exist: {}", path.display())));
    }
    if !path.is_dir() {
        error!("{name} is not a directory: {}", path.display());
        return Err(Error::Config(format!("{name} is not a directory: {}", path.display())));
    }
    Ok(())
}

/// Ensure directory is readable by attempting to open its entries.
fn ensure_readable(path: &Path, name: &str) -> Result<()> {
    fs::read_dir(path).map_err(|e| {
        Error::Config(format!(
            "cannot read {name} directory '{}' ({e}); check permissions",
            path.display()
        ))
    })?;
    debug!("{name} readable: {}", path.display());
    Ok(())
}

/// The document root may be given absolute or relative to the managed root;
/// either way it must resolve inside it. Returned relative.
fn normalize_doc_root(root: &Path, doc_root: &Path) -> Result<PathBuf> {
    if doc_root.as_os_str().is_empty() {
        return Ok(PathBuf::new());
    }
    let joined = if doc_root.is_absolute() {
        doc_root.to_path_buf()
    } else {
        root.join(doc_root)
    };
    let resolved = dunce::canonicalize(&joined).map_err(|e| {
        Error::Config(format!("cannot resolve doc_root '{}': {e}", doc_root.display()))
    })?;
    if !resolved.is_dir() {
        return Err(Error::Config(format!(
            "doc_root is not a directory: {}",
            resolved.display()
        )));
    }
    match resolved.strip_prefix(root) {
        Ok(rel) => Ok(rel.to_path_buf()),
        Err(_) => Err(Error::Config(format!(
            "doc_root '{}' is outside managed_root '{}'",
            resolved.display(),
            root.display()
        ))),
    }
}
