//! Filesystem layer: the `FileSystem` capability, its implementations,
//! atomic writes, error enrichment and the per-root lock.

mod atomic;
mod fault;
mod helpers;
pub mod lock;
mod memory;
mod service;
mod util;

pub use atomic::AtomicWriter;
pub use fault::{FaultInjectingFileSystem, FsOp};
pub use helpers::io_error_with_help;
pub use lock::{RootLock, acquire_root_lock, try_acquire_root_lock};
pub use memory::MemoryFileSystem;
pub use service::{FileStat, FileSystem, OsFileSystem};
pub use util::{ARTIFACT_PREFIX, is_internal_artifact};

pub(crate) use util::{is_cross_device, is_orphan_temp, unique_temp_path};
