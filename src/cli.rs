//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - Flags override values loaded from config.xml.

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::config::types::{Config, LogLevel};

/// Transactional migration and integrity checks for Markdown trees.
#[derive(Parser, Debug, Clone)]
#[command(name = "kb-migrate", author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs in structured JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the config file location used by kb-migrate and exit.
    #[arg(long)]
    pub print_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply a JSON batch of write/move/delete operations as one transaction
    Apply {
        /// Batch file: {"operations": [{"kind": "move", "source": ..., "target": ...}, ...]}
        #[arg(value_name = "BATCH", value_hint = ValueHint::FilePath)]
        batch: PathBuf,

        /// Managed root (overrides managed_root from config)
        #[arg(long, value_hint = ValueHint::DirPath)]
        root: Option<PathBuf>,

        /// Preview on an in-memory copy; the tree is not modified
        #[arg(long)]
        dry_run: bool,

        /// Roll back if any link cannot be rewritten
        #[arg(long)]
        strict_links: bool,

        /// Write a manifest of the committed tree to FILE
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        manifest_out: Option<PathBuf>,
    },

    /// Digest every file under ROOT into a manifest
    Manifest {
        #[arg(value_name = "ROOT", value_hint = ValueHint::DirPath)]
        root: PathBuf,

        /// Where to write the manifest (default: stdout)
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        out: Option<PathBuf>,

        /// Root-relative path to leave out (repeatable)
        #[arg(long = "exclude", value_name = "NAME")]
        exclude: Vec<String>,
    },

    /// Check ROOT against a manifest; exits 1 when anything is off
    Verify {
        #[arg(value_name = "ROOT", value_hint = ValueHint::DirPath)]
        root: PathBuf,

        /// Manifest to check against (default: ROOT/<manifest_name>)
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        manifest: Option<PathBuf>,
    },

    /// Bring the managed root in line with SOURCE, turning renames into moves
    Sync {
        #[arg(value_name = "SOURCE", value_hint = ValueHint::DirPath)]
        source: PathBuf,

        /// Managed root (overrides managed_root from config)
        #[arg(long, value_hint = ValueHint::DirPath)]
        root: Option<PathBuf>,

        /// Delete files that SOURCE no longer has
        #[arg(long)]
        prune: bool,

        /// Preview on an in-memory copy; the tree is not modified
        #[arg(long)]
        dry_run: bool,

        /// Roll back if any link cannot be rewritten
        #[arg(long)]
        strict_links: bool,
    },
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        match &self.command {
            Some(Command::Apply {
                root,
                dry_run,
                strict_links,
                ..
            })
            | Some(Command::Sync {
                root,
                dry_run,
                strict_links,
                ..
            }) => {
                if let Some(root) = root {
                    cfg.managed_root = root.clone();
                }
                cfg.dry_run |= *dry_run;
                cfg.strict_links |= *strict_links;
            }
            // These take their root positionally and never touch the managed root.
            Some(Command::Manifest { .. }) | Some(Command::Verify { .. }) | None => {}
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_beats_log_level() {
        let args = Args::parse_from(["kb-migrate", "--debug", "--log-level", "quiet"]);
        assert_eq!(args.effective_log_level(), Some(LogLevel::Debug));
        let args = Args::parse_from(["kb-migrate", "verify", "/kb", "--log-level", "info"]);
        assert_eq!(args.effective_log_level(), Some(LogLevel::Info));
    }

    #[test]
    fn apply_overrides_root_and_flags() {
        let args = Args::parse_from([
            "kb-migrate",
            "apply",
            "batch.json",
            "--root",
            "/kb",
            "--dry-run",
            "--strict-links",
        ]);
        let mut cfg = Config::new("/elsewhere");
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.managed_root, PathBuf::from("/kb"));
        assert!(cfg.dry_run && cfg.strict_links);
    }

    #[test]
    fn config_root_is_kept_without_flag() {
        let args = Args::parse_from(["kb-migrate", "sync", "/bundle", "--prune"]);
        let mut cfg = Config::new("/kb");
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.managed_root, PathBuf::from("/kb"));
        assert!(!cfg.dry_run);
        assert!(matches!(args.command, Some(Command::Sync { prune: true, .. })));
    }
}
