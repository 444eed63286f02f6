//! Typed error definitions for kb_migrate.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A filesystem call failed. `message` already carries op, path and a hint.
    #[error("{message}")]
    Io {
        op: String,
        path: PathBuf,
        message: String,
        #[source]
        source: io::Error,
    },

    /// Malformed batch; raised before anything on disk is touched.
    #[error("invalid operation batch: {0}")]
    Validation(String),

    #[error("cannot rewrite link '{raw_target}' in {file}: {reason}")]
    LinkResolution {
        file: String,
        raw_target: String,
        reason: String,
    },

    /// Mid-batch failure. Always produced after a rollback attempt.
    #[error("transaction rolled back after: {cause}{}", describe_restore(.restore_errors))]
    PartialFailure {
        cause: Box<Error>,
        restore_errors: Vec<Error>,
    },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("config error: {0}")]
    Config(String),

    /// A shutdown was requested while a transaction was in flight.
    #[error("shutdown requested")]
    Interrupted,
}

fn describe_restore(errors: &[Error]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut msg = format!(
        "; rollback incomplete ({} restore failure(s), manual intervention required)",
        errors.len()
    );
    for e in errors {
        msg.push_str(&format!("\n  - {e}"));
    }
    msg
}

impl Error {
    /// Stable numeric code for structured logs.
    pub fn code(&self) -> u16 {
        match self {
            Error::Io { .. } => 10,
            Error::Validation(_) => 20,
            Error::LinkResolution { .. } => 30,
            Error::PartialFailure { .. } => 40,
            Error::Manifest(_) => 50,
            Error::Config(_) => 60,
            Error::Interrupted => 70,
        }
    }

    /// Short machine-friendly kind used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io { .. } => "io",
            Error::Validation(_) => "validation",
            Error::LinkResolution { .. } => "link_resolution",
            Error::PartialFailure { .. } => "partial_failure",
            Error::Manifest(_) => "manifest",
            Error::Config(_) => "config",
            Error::Interrupted => "interrupted",
        }
    }

    /// For a `PartialFailure`: true when every snapshot was restored.
    /// Other variants never involve a rollback and report true.
    pub fn rollback_clean(&self) -> bool {
        match self {
            Error::PartialFailure { restore_errors, .. } => restore_errors.is_empty(),
            _ => true,
        }
    }
}
