//! In-memory `FileSystem`.
//!
//! Used for dry-run previews (the engine replays a batch against a copy of the
//! tree) and as a test double. Directories are explicit: writing a file whose
//! parent was never created fails with NotFound, like a real filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use super::service::{FileStat, FileSystem};
use crate::errors::Result;
use crate::fs_ops::helpers::io_error_with_help;
use crate::fs_ops::util::is_internal_artifact;

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<PathBuf, (Vec<u8>, SystemTime)>,
    dirs: BTreeSet<PathBuf>,
}

impl State {
    fn dir_exists(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || path.parent().is_none() || self.dirs.contains(path)
    }

    fn add_dir_all(&mut self, path: &Path) {
        for anc in path.ancestors() {
            if anc.as_os_str().is_empty() || anc.parent().is_none() {
                break;
            }
            self.dirs.insert(anc.to_path_buf());
        }
    }

    fn require_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !self.dir_exists(parent) => Err(not_found(parent)),
            _ => Ok(()),
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file or directory: {}", path.display()))
}

/// `FileSystem` that keeps every file in a map.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    state: Mutex<State>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test convenience: insert a file, creating its parent directories.
    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let path = path.as_ref();
        let mut st = self.lock();
        if let Some(parent) = path.parent() {
            st.add_dir_all(parent);
        }
        st.files
            .insert(path.to_path_buf(), (contents.as_ref().to_vec(), SystemTime::now()));
    }

    /// Copy every file under `root` from `source` into a fresh in-memory tree.
    /// Lock and temp files are left behind.
    pub fn snapshot_of(source: &dyn FileSystem, root: &Path) -> Result<Self> {
        let mem = Self::new();
        mem.lock().add_dir_all(root);
        let files = source
            .list_files_recursive(root)
            .map_err(io_error_with_help("list files", root))?;
        for path in files.into_iter().filter(|p| !is_internal_artifact(p)) {
            let bytes = source.read(&path).map_err(io_error_with_help("read", &path))?;
            mem.insert_file(&path, bytes);
        }
        Ok(mem)
    }

    /// All files and their contents, sorted by path.
    pub fn files(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.lock()
            .files
            .iter()
            .map(|(p, (bytes, _))| (p.clone(), bytes.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut st = self.lock();
        if st.dirs.contains(path) {
            return Err(io::Error::other(format!("is a directory: {}", path.display())));
        }
        st.require_parent(path)?;
        st.files
            .insert(path.to_path_buf(), (contents.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut st = self.lock();
        if st.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file exists: {}", path.display()),
            ));
        }
        st.add_dir_all(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut st = self.lock();
        if st.dirs.contains(to) {
            return Err(io::Error::other(format!("is a directory: {}", to.display())));
        }
        st.require_parent(to)?;
        let entry = st.files.remove(from).ok_or_else(|| not_found(from))?;
        st.files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut st = self.lock();
        if !st.dirs.contains(path) {
            return Err(not_found(path));
        }
        let occupied = st.files.keys().any(|p| p.starts_with(path))
            || st.dirs.iter().any(|d| d != path && d.starts_with(path));
        if occupied {
            return Err(io::Error::other(format!("directory not empty: {}", path.display())));
        }
        st.dirs.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let st = self.lock();
        st.files.contains_key(path) || st.dirs.contains(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let st = self.lock();
        if let Some((bytes, modified)) = st.files.get(path) {
            return Ok(FileStat {
                size: bytes.len() as u64,
                modified: Some(*modified),
                is_dir: false,
            });
        }
        if st.dir_exists(path) {
            return Ok(FileStat {
                size: 0,
                modified: None,
                is_dir: true,
            });
        }
        Err(not_found(path))
    }

    fn list_files_recursive(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let st = self.lock();
        if !st.dir_exists(root) && !st.files.contains_key(root) {
            return Err(not_found(root));
        }
        Ok(st
            .files
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_parent_directory() {
        let fs = MemoryFileSystem::new();
        let err = fs.write(Path::new("/kb/docs/a.md"), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        fs.create_dir_all(Path::new("/kb/docs")).unwrap();
        fs.write(Path::new("/kb/docs/a.md"), b"x").unwrap();
        assert!(fs.exists(Path::new("/kb/docs/a.md")));
        assert!(fs.is_dir(Path::new("/kb")));
    }

    #[test]
    fn rename_moves_bytes() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/kb/a.md", "hello");
        fs.rename(Path::new("/kb/a.md"), Path::new("/kb/b.md")).unwrap();
        assert!(!fs.exists(Path::new("/kb/a.md")));
        assert_eq!(fs.read(Path::new("/kb/b.md")).unwrap(), b"hello");
    }

    #[test]
    fn remove_dir_only_when_empty() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/kb/sub/a.md", "x");
        assert!(fs.remove_dir(Path::new("/kb/sub")).is_err());
        fs.remove_file(Path::new("/kb/sub/a.md")).unwrap();
        fs.remove_dir(Path::new("/kb/sub")).unwrap();
        assert!(!fs.exists(Path::new("/kb/sub")));
    }

    #[test]
    fn list_is_scoped_to_root() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/kb/b.md", "b");
        fs.insert_file("/kb/a/x.md", "x");
        fs.insert_file("/other/c.md", "c");
        let files = fs.list_files_recursive(Path::new("/kb")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/kb/a/x.md"), PathBuf::from("/kb/b.md")]);
    }

    #[test]
    fn snapshot_copies_tree() {
        let src = MemoryFileSystem::new();
        src.insert_file("/kb/docs/a.md", "a");
        let snap = MemoryFileSystem::snapshot_of(&src, Path::new("/kb")).unwrap();
        assert_eq!(snap.read(Path::new("/kb/docs/a.md")).unwrap(), b"a");
        snap.remove_file(Path::new("/kb/docs/a.md")).unwrap();
        assert!(src.exists(Path::new("/kb/docs/a.md")));
    }
}
