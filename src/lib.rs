//! Core library for `kb_migrate`.
//!
//! Applies batches of file writes, moves and deletes to a Markdown tree as a
//! single transaction: everything is snapshotted first, links made stale by
//! the moves are rewritten, and any failure restores the tree byte for byte.
//! Integrity manifests (SHA-256 per file) verify bundles before and after.
//!
//! The binary is a thin CLI over these modules; tests and embedders can swap
//! the real filesystem for `MemoryFileSystem` or `FaultInjectingFileSystem`.

pub mod backup;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs_ops;
pub mod integrity;
pub mod links;
pub mod output;
pub mod platform;
pub mod recover;
pub mod shutdown;
pub mod sync;

pub use backup::{BackupScope, BackupService, BackupSnapshot, RestoreReport, SnapshotContent};
pub use config::{
    Config, LogLevel, default_config_path, default_log_path, load_config_from_xml_path,
    path_has_symlink_ancestor, validate_and_normalize,
};
pub use engine::{
    EngineOptions, FileOperation, ManagedRoot, OperationBatch, TransactionResult,
    TransactionalMigrationEngine, TxState,
};
pub use errors::{Error, Result};
pub use fs_ops::{FaultInjectingFileSystem, FileSystem, MemoryFileSystem, OsFileSystem};
pub use integrity::{IntegrityVerifier, Manifest, ManifestEntry, VerificationReport};
pub use links::{LinkKind, LinkReference, MarkdownLinkProcessor};
pub use recover::cleanup_orphan_temps;
pub use sync::{SyncOptions, plan_sync};
