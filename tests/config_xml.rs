//! Config discovery through KB_MIGRATE_CONFIG and the per-user default path.
//! These tests mutate process env vars, so they run serially.

use std::env;
use std::fs;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::tempdir;

use kb_migrate::config::{CONFIG_ENV, LoadResult, load_or_init};
use kb_migrate::{Error, LogLevel, load_config_from_xml_path, validate_and_normalize};

#[test]
#[serial]
fn explicit_config_is_loaded_and_validated() {
    let td = tempdir().unwrap();
    let root = td.path().join("kb");
    fs::create_dir_all(root.join("site")).unwrap();
    let cfg_path = td.path().join("config.xml");
    fs::write(
        &cfg_path,
        format!(
            "<config>\n  <managed_root>{}</managed_root>\n  <doc_root>site</doc_root>\n  <log_level>info</log_level>\n  <strict_links>true</strict_links>\n  <manifest_name>bundle.json</manifest_name>\n</config>\n",
            root.display()
        ),
    )
    .unwrap();

    unsafe { env::set_var(CONFIG_ENV, &cfg_path) };
    let loaded = load_or_init();
    unsafe { env::remove_var(CONFIG_ENV) };

    let LoadResult::Loaded { mut config, path } = loaded.unwrap() else {
        panic!("expected the explicit config to load");
    };
    assert_eq!(path, cfg_path);
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.strict_links);
    assert_eq!(config.manifest_name, "bundle.json");

    validate_and_normalize(&mut config).unwrap();
    assert_eq!(config.managed_root, dunce::canonicalize(&root).unwrap());
    assert_eq!(config.doc_root, PathBuf::from("site"));
    assert!(config.engine_options().strict_links);
}

#[test]
#[serial]
fn missing_explicit_config_is_an_error() {
    let td = tempdir().unwrap();
    unsafe { env::set_var(CONFIG_ENV, td.path().join("absent.xml")) };
    let result = load_or_init();
    unsafe { env::remove_var(CONFIG_ENV) };
    assert!(matches!(result, Err(Error::Config(_))), "{result:?}");
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn first_run_writes_a_loadable_template() {
    let home = tempdir().unwrap();
    let saved_home = env::var_os("HOME");
    let saved_xdg = env::var_os("XDG_CONFIG_HOME");
    unsafe {
        env::remove_var(CONFIG_ENV);
        env::remove_var("XDG_CONFIG_HOME");
        env::set_var("HOME", home.path());
    }

    let first = load_or_init();
    let second = load_or_init();

    unsafe {
        match saved_home {
            Some(h) => env::set_var("HOME", h),
            None => env::remove_var("HOME"),
        }
        if let Some(x) = saved_xdg {
            env::set_var("XDG_CONFIG_HOME", x);
        }
    }

    let expected = home.path().join(".config/kb_migrate/config.xml");
    match first.unwrap() {
        LoadResult::CreatedTemplate(p) => assert_eq!(p, expected),
        other => panic!("expected a template, got {other:?}"),
    }
    assert!(matches!(second.unwrap(), LoadResult::Loaded { .. }));
    let cfg = load_config_from_xml_path(&expected).unwrap();
    assert_eq!(cfg.markdown_extensions, vec!["md", "markdown"]);
}
