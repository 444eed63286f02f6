//! End-to-end runs of the `kb-migrate` binary against temp directories.
//! Each run gets its own config file so no user state is read or written.

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn kb_migrate(home: &TempDir) -> Command {
    let cfg = home.child("config.xml");
    if !cfg.path().exists() {
        cfg.write_str(&format!(
            "<config>\n  <log_level>normal</log_level>\n  <log_file>{}</log_file>\n</config>\n",
            home.child("kb_migrate.log").path().display()
        ))
        .unwrap();
    }
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kb-migrate"));
    cmd.env("KB_MIGRATE_CONFIG", cfg.path())
        .env("HOME", home.path())
        .env_remove("RUST_LOG");
    cmd
}

fn knowledge_base() -> TempDir {
    let kb = TempDir::new().unwrap();
    kb.child("docs/a.md").write_str("# A\n").unwrap();
    kb.child("docs/b.md").write_str("[see a](./a.md)\n").unwrap();
    kb
}

#[test]
fn print_config_reports_explicit_path() {
    let home = TempDir::new().unwrap();
    kb_migrate(&home)
        .arg("--print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("KB_MIGRATE_CONFIG").and(predicate::str::contains("config.xml")));
}

#[test]
fn apply_moves_and_rewrites_links() {
    let home = TempDir::new().unwrap();
    let kb = knowledge_base();
    let batch = home.child("batch.json");
    batch
        .write_str(r#"{"operations": [{"kind": "move", "source": "docs/a.md", "target": "docs/sub/a.md"}]}"#)
        .unwrap();

    kb_migrate(&home)
        .args(["apply", batch.path().to_str().unwrap(), "--root", kb.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("move docs/a.md -> docs/sub/a.md"))
        .stdout(predicate::str::contains("rewrite links in docs/b.md"));

    kb.child("docs/sub/a.md").assert("# A\n");
    kb.child("docs/b.md").assert("[see a](./sub/a.md)\n");
    kb.child(".kb_migrate.lock").assert(predicate::path::missing());
    home.child("kb_migrate.log").assert(predicate::path::exists());
}

#[test]
fn apply_dry_run_changes_nothing() {
    let home = TempDir::new().unwrap();
    let kb = knowledge_base();
    let batch = home.child("batch.json");
    batch
        .write_str(r#"{"operations": [{"kind": "delete", "source": "docs/a.md"}]}"#)
        .unwrap();

    kb_migrate(&home)
        .args(["apply", batch.path().to_str().unwrap(), "--root", kb.path().to_str().unwrap(), "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would delete docs/a.md"));

    kb.child("docs/a.md").assert("# A\n");
}

#[test]
fn invalid_batch_fails_without_touching_the_tree() {
    let home = TempDir::new().unwrap();
    let kb = knowledge_base();
    let batch = home.child("batch.json");
    batch
        .write_str(r#"{"operations": [{"kind": "move", "source": "docs/a.md", "target": "docs/b.md"}]}"#)
        .unwrap();

    kb_migrate(&home)
        .args(["apply", batch.path().to_str().unwrap(), "--root", kb.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("name collision"));

    kb.child("docs/a.md").assert("# A\n");
    kb.child("docs/b.md").assert("[see a](./a.md)\n");
}

#[test]
fn manifest_then_verify_detects_corruption() {
    let home = TempDir::new().unwrap();
    let kb = knowledge_base();
    let manifest = kb.child("manifest.json");

    kb_migrate(&home)
        .args(["manifest", kb.path().to_str().unwrap(), "--out", manifest.path().to_str().unwrap()])
        .assert()
        .success();
    manifest.assert(predicate::str::contains("\"totalFiles\": 2"));

    kb_migrate(&home)
        .args(["verify", kb.path().to_str().unwrap()])
        .assert()
        .success();

    kb.child("docs/a.md").write_str("# a\n").unwrap();
    kb_migrate(&home)
        .args(["verify", kb.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("corrupted").and(predicate::str::contains("docs/a.md")));
}

#[test]
fn manifest_without_out_prints_json() {
    let home = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb_migrate(&home)
        .args(["manifest", kb.path().to_str().unwrap(), "--exclude", "docs/b.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"docs/a.md\"").and(predicate::str::contains("docs/b.md").not()));
}

#[test]
fn sync_installs_a_bundle() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    bundle.child("index.md").write_str("[g](docs/guide.md)\n").unwrap();
    bundle.child("docs/guide.md").write_str("# Guide\n").unwrap();
    let kb = TempDir::new().unwrap();

    kb_migrate(&home)
        .args(["sync", bundle.path().to_str().unwrap(), "--root", kb.path().to_str().unwrap()])
        .assert()
        .success();
    kb.child("docs/guide.md").assert("# Guide\n");

    kb_migrate(&home)
        .args(["sync", bundle.path().to_str().unwrap(), "--root", kb.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Already up to date"));
}
