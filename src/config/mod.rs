//! Config module.
//! Provides configuration types, default paths, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_log_path, path_has_symlink_ancestor, resolve_config_path};
pub use types::{Config, LogLevel};
pub use validate::validate_and_normalize;
pub use xml::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "KB_MIGRATE_CONFIG";
pub const MANIFEST_NAME_DEFAULT: &str = "manifest.json";
pub const MARKDOWN_EXTENSIONS_DEFAULT: &[&str] = &["md", "markdown"];
