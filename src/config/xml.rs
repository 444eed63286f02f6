//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless KB_MIGRATE_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; directory validation happens elsewhere.
//! - Unknown XML fields are a hard error so misconfigurations surface early.

use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::paths::{default_log_path, path_has_symlink_ancestor, resolve_config_path};
use super::{CONFIG_ENV, MANIFEST_NAME_DEFAULT};

use crate::config::types::{Config, LogLevel};
use crate::errors::{Error, Result};
use crate::fs_ops::io_error_with_help;
use crate::platform::{set_dir_mode_0700, set_file_mode_0600, write_config_secure_new_0600};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(rename = "managed_root")]
    managed_root: Option<String>,
    #[serde(rename = "doc_root")]
    doc_root: Option<String>,
    #[serde(rename = "log_level")]
    log_level: Option<String>,
    #[serde(rename = "log_file")]
    log_file: Option<String>,
    /// Comma-separated, e.g. `md,markdown`
    #[serde(rename = "markdown_extensions")]
    markdown_extensions: Option<String>,
    #[serde(rename = "strict_links", default, deserialize_with = "de_bool_trimmed_opt")]
    strict_links: Option<bool>,
    #[serde(rename = "manifest_name")]
    manifest_name: Option<String>,
}

// quick-xml hands element text over verbatim, so tolerate surrounding whitespace.
fn de_bool_trimmed_opt<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("true") || s == "1" => Ok(Some(true)),
        Some(s) if s.eq_ignore_ascii_case("false") || s == "0" => Ok(Some(false)),
        Some(s) => Err(serde::de::Error::custom(format!("expected true/false, got '{s}'"))),
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}

/// Outcome of looking for the config file at startup.
#[derive(Debug)]
pub enum LoadResult {
    Loaded { config: Config, path: PathBuf },
    /// No file yet; a commented template was written at `path`.
    CreatedTemplate(PathBuf),
    /// No file and no template (explicit path missing, or no home dir).
    Missing,
}

/// Load the config from `KB_MIGRATE_CONFIG` or the OS default path.
/// A missing default config gets a template; a missing explicit one is an error.
pub fn load_or_init() -> Result<LoadResult> {
    let Some((path, explicit)) = resolve_config_path() else {
        debug!("No config directory available; using built-in defaults");
        return Ok(LoadResult::Missing);
    };
    if path.exists() {
        let config = load_config_from_xml_path(&path)?;
        return Ok(LoadResult::Loaded { config, path });
    }
    if explicit {
        return Err(Error::Config(format!(
            "{CONFIG_ENV} points to '{}', which does not exist",
            path.display()
        )));
    }
    create_template_config(&path)?;
    Ok(LoadResult::CreatedTemplate(path))
}

/// Map XmlConfig -> Config. Absent fields keep their defaults.
fn xml_to_config(parsed: XmlConfig, path: &Path) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(s) = non_empty(parsed.managed_root.as_deref()) {
        cfg.managed_root = PathBuf::from(s);
    }
    if let Some(s) = non_empty(parsed.doc_root.as_deref()) {
        cfg.doc_root = PathBuf::from(s);
    }
    if let Some(s) = non_empty(parsed.log_file.as_deref()) {
        cfg.log_file = Some(PathBuf::from(s));
    }
    if let Some(s) = non_empty(parsed.log_level.as_deref()) {
        cfg.log_level = s
            .parse::<LogLevel>()
            .map_err(|e| Error::Config(format!("{e} in '{}'", path.display())))?;
    }
    if let Some(s) = non_empty(parsed.markdown_extensions.as_deref()) {
        cfg.markdown_extensions = s
            .split(',')
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
    }
    if let Some(s) = non_empty(parsed.manifest_name.as_deref()) {
        cfg.manifest_name = s.to_string();
    }
    cfg.strict_links = parsed.strict_links.unwrap_or(false);

    Ok(cfg)
}

/// Load a Config from a specific XML file path (quick_xml).
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).map_err(io_error_with_help("read config xml", path))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .map_err(|e| Error::Config(format!("cannot parse '{}': {e}", path.display())))?;
    let cfg = xml_to_config(parsed, path)?;
    debug!(path = %path.display(), root = %cfg.managed_root.display(), "Loaded config");
    Ok(cfg)
}

/// Create default template config file and parent directory (best-effort permissions).
/// Uses secure creation to avoid following attacker-controlled symlinks on Unix.
pub fn create_template_config(path: &Path) -> Result<()> {
    let symlinked = path_has_symlink_ancestor(path)
        .map_err(io_error_with_help("inspect config path", path))?;
    if symlinked {
        return Err(Error::Config(format!(
            "refusing to create config: ancestor of {} is a symlink",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error_with_help("create config directory", parent))?;
        let _ = set_dir_mode_0700(parent);
    }

    let suggested_log = default_log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/path/to/kb_migrate.log".into());

    let content = format!(
        "<!--\n  kb_migrate configuration (XML)\n\n  Fields:\n    managed_root         -> directory tree that batches operate on\n    doc_root             -> where /-prefixed links resolve, relative to managed_root (empty = managed_root)\n    log_level            -> quiet | normal | info | debug\n    log_file             -> path to log file (optional; stdout/stderr still used)\n    markdown_extensions  -> comma-separated extensions scanned for links\n    strict_links         -> true: a link that cannot be rewritten rolls the batch back\n    manifest_name        -> file name of the manifest embedded in bundles\n\n  Notes:\n    - CLI flags override XML values.\n-->\n<config>\n  <managed_root>.</managed_root>\n  <doc_root></doc_root>\n  <log_level>normal</log_level>\n  <log_file>{suggested_log}</log_file>\n  <markdown_extensions>md,markdown</markdown_extensions>\n  <strict_links>false</strict_links>\n  <manifest_name>{MANIFEST_NAME_DEFAULT}</manifest_name>\n</config>\n",
    );

    write_config_secure_new_0600(path, content.as_bytes())
        .map_err(io_error_with_help("write template config", path))?;
    let _ = set_file_mode_0600(path);

    info!(path = %path.display(), "Created template config");
    Ok(())
}
