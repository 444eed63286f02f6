use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix shared by every file this crate creates next to user content.
pub const ARTIFACT_PREFIX: &str = ".kb_migrate.";
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling temp path inside `dir`.
/// Pattern: .kb_migrate.<pid>.<nanos>.<seq>.tmp
pub(crate) fn unique_temp_path(dir: &Path) -> PathBuf {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{ARTIFACT_PREFIX}{pid}.{nanos}.{seq}{TEMP_SUFFIX}"))
}

/// True for temp and lock files this crate leaves next to user content.
pub fn is_internal_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX))
}

/// True for a leftover temp file from an interrupted atomic write.
pub(crate) fn is_orphan_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX) && name.ends_with(TEMP_SUFFIX))
}

pub(crate) fn is_cross_device(e: &io::Error) -> bool {
    // std::io::ErrorKind has no stable CrossesDevices on our MSRV,
    // so detect EXDEV / ERROR_NOT_SAME_DEVICE via raw OS error codes.
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) => code == libc::EXDEV,
        #[cfg(windows)]
        Some(code) => code == 17,
        #[cfg(not(any(unix, windows)))]
        Some(_) => false,
        None => false,
    }
}

#[cfg(unix)]
pub(crate) fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn temp_paths_are_unique_across_threads() {
        let handles: Vec<_> = (0..32)
            .map(|_| thread::spawn(|| unique_temp_path(Path::new("/kb"))))
            .collect();
        let set: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(set.len(), 32);
    }

    #[test]
    fn temp_paths_are_recognized_as_artifacts() {
        let p = unique_temp_path(Path::new("docs"));
        assert_eq!(p.parent(), Some(Path::new("docs")));
        assert!(is_internal_artifact(&p));
        assert!(is_orphan_temp(&p));
        assert!(!is_orphan_temp(Path::new("docs/.kb_migrate.lock")));
        assert!(!is_internal_artifact(Path::new("docs/guide.md")));
    }

    #[cfg(unix)]
    #[test]
    fn exdev_is_cross_device() {
        assert!(is_cross_device(&io::Error::from_raw_os_error(libc::EXDEV)));
        assert!(!is_cross_device(&io::Error::from(io::ErrorKind::NotFound)));
    }
}
