//! I/O error enrichment.
//!
//! Every filesystem failure that leaves the library carries the operation, the
//! offending path and, when the OS code is recognizable, a short hint.
//!
//! Usage:
//!   fs.read(&abs).map_err(io_error_with_help("read", &abs))?;

use std::io;
use std::path::Path;

use crate::errors::Error;

/// Hint for a raw OS error code, if we know one.
#[cfg(unix)]
fn hint_for_code(code: i32) -> Option<&'static str> {
    let hint = match code {
        libc::EACCES | libc::EPERM => "permission denied; check ownership and write permissions",
        libc::EXDEV => "cross-filesystem; atomic rename not possible",
        libc::ENOENT => "path not found; verify it exists",
        libc::EEXIST => "already exists",
        libc::ENOSPC => "insufficient space on device",
        libc::EROFS => "read-only filesystem; cannot write here",
        libc::ENAMETOOLONG => "filename or path too long; shorten path segments",
        libc::ENOTEMPTY => "directory not empty",
        libc::EMFILE | libc::ENFILE => "too many open files",
        _ => return None,
    };
    Some(hint)
}

#[cfg(not(unix))]
fn hint_for_code(_code: i32) -> Option<&'static str> {
    None
}

fn hint_for_kind(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::PermissionDenied => Some("permission denied; check ownership and write permissions"),
        io::ErrorKind::NotFound => Some("path not found; verify it exists"),
        io::ErrorKind::AlreadyExists => Some("already exists"),
        _ => None,
    }
}

/// Format `"<op> '<path>': <error> - <hint> [os code: N]"`.
pub(crate) fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);
    let hint = match e.raw_os_error() {
        Some(code) => hint_for_code(code),
        None => hint_for_kind(e.kind()),
    };
    if let Some(h) = hint {
        msg.push_str(" - ");
        msg.push_str(h);
    }
    if let Some(code) = e.raw_os_error() {
        msg.push_str(&format!(" [os code: {}]", code));
    }
    msg
}

/// Returns a closure for `.map_err(...)` converting io::Error into [`Error::Io`].
pub fn io_error_with_help<'a>(op: &'a str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
    move |e: io::Error| Error::Io {
        op: op.to_string(),
        path: path.to_path_buf(),
        message: build_message(op, path, &e),
        source: e,
    }
}
