//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::paths;
use super::{MANIFEST_NAME_DEFAULT, MARKDOWN_EXTENSIONS_DEFAULT};
use crate::engine::{EngineOptions, ManagedRoot};

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Informational output (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime configuration for the migration CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory tree that batches operate on
    pub managed_root: PathBuf,
    /// Where `/`-prefixed links resolve, relative to managed_root
    pub doc_root: PathBuf,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    /// If true, preview batches on an in-memory copy
    pub dry_run: bool,
    /// If true, any link that cannot be rewritten fails the transaction
    pub strict_links: bool,
    /// Extensions scanned for links (no dot)
    pub markdown_extensions: Vec<String>,
    /// File name of the manifest embedded in bundles
    pub manifest_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            managed_root: PathBuf::from("."),
            doc_root: PathBuf::new(),
            log_level: LogLevel::Normal,
            log_file: paths::default_log_path(),
            dry_run: false,
            strict_links: false,
            markdown_extensions: MARKDOWN_EXTENSIONS_DEFAULT.iter().map(|s| s.to_string()).collect(),
            manifest_name: MANIFEST_NAME_DEFAULT.to_string(),
        }
    }
}

impl Config {
    /// Construct a Config for `managed_root`; other fields use defaults.
    pub fn new(managed_root: impl Into<PathBuf>) -> Self {
        Self {
            managed_root: managed_root.into(),
            ..Default::default()
        }
    }

    pub fn managed_root(&self) -> ManagedRoot {
        ManagedRoot::new(&self.managed_root).with_doc_root(&self.doc_root)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            dry_run: self.dry_run,
            strict_links: self.strict_links,
            markdown_extensions: self.markdown_extensions.clone(),
        }
    }
}
