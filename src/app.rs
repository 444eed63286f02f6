//! Application orchestrator.
//! Loads/merges config, initializes logging, takes the root lock, and dispatches
//! the subcommand to the library.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use kb_migrate::cli::{Args, Command};
use kb_migrate::config::{CONFIG_ENV, LoadResult, load_or_init, resolve_config_path};
use kb_migrate::fs_ops::{FileSystem, OsFileSystem, RootLock, try_acquire_root_lock};
use kb_migrate::integrity::{read_manifest, write_manifest};
use kb_migrate::output as out;
use kb_migrate::{
    Config, Error, IntegrityVerifier, OperationBatch, SyncOptions, TransactionResult,
    TransactionalMigrationEngine, VerificationReport, cleanup_orphan_temps, links::to_slash,
    plan_sync, shutdown, validate_and_normalize,
};

use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<ExitCode> {
    // Handle --print-config before logging init
    if args.print_config {
        print_config_location();
        return Ok(ExitCode::SUCCESS);
    }

    // Load config (may create a template on first run); CLI args override it.
    let mut cfg = match load_or_init() {
        Ok(LoadResult::Loaded { config, path }) => {
            debug!(path = %path.display(), "Using config file");
            config
        }
        Ok(LoadResult::CreatedTemplate(path)) => {
            out::print_success(&format!("A template kb_migrate config was written to: {}", path.display()));
            out::print_info(&format!(
                "Edit it to set `managed_root` and friends, or point {CONFIG_ENV} at another file. Continuing with defaults."
            ));
            Config::default()
        }
        Ok(LoadResult::Missing) => Config::default(),
        Err(e) => {
            out::print_error(&e.to_string());
            return Err(e.into());
        }
    };
    args.apply_overrides(&mut cfg);

    // Initialize logging; the guard flushes the file writer when dropped at the end of run.
    let _guard = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;

    // A signal only sets the flag; the engine notices it between steps and rolls back.
    ctrlc::set_handler(|| {
        shutdown::request();
        out::print_warn("Received interrupt; rolling back the current batch...");
    })
    .context("install signal handler")?;

    debug!(?args, "Starting kb-migrate");

    let Some(command) = args.command.clone() else {
        out::print_error("No command given. Run `kb-migrate --help` for usage.");
        return Ok(ExitCode::from(2));
    };

    let result = match command {
        Command::Apply {
            batch, manifest_out, ..
        } => cmd_apply(cfg, &batch, manifest_out.as_deref()),
        Command::Manifest { root, out, exclude } => cmd_manifest(&root, out.as_deref(), exclude),
        Command::Verify { root, manifest } => cmd_verify(&cfg, &root, manifest),
        Command::Sync { source, prune, .. } => cmd_sync(cfg, &source, prune),
    };

    if let Err(e) = &result {
        match e.downcast_ref::<Error>() {
            Some(err) => log_library_error(err),
            None => error!(error = ?e, "Command failed"),
        }
    }
    result
}

fn print_config_location() {
    match resolve_config_path() {
        Some((p, true)) => {
            out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {}\n", p.display()));
            out::print_info(&format!("To override, unset {CONFIG_ENV} or set it to another file."));
        }
        Some((p, false)) => {
            out::print_info(&format!("Default kb_migrate config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet. Run any command to create a template.");
            }
        }
        None => out::print_error("Could not determine a default config path."),
    }
}

fn log_library_error(err: &Error) {
    let code = err.code();
    let kind = err.kind();
    match err {
        Error::Io { op, path, .. } => {
            error!(code, kind, op = %op, path = %path.display(), "I/O failure")
        }
        Error::Validation(msg) => error!(code, kind, reason = %msg, "Batch rejected; nothing was changed"),
        Error::PartialFailure { cause, restore_errors } if matches!(**cause, Error::Interrupted) => error!(
            code,
            kind,
            rollback_clean = restore_errors.is_empty(),
            "Interrupted; transaction rolled back"
        ),
        Error::PartialFailure { cause, restore_errors } => error!(
            code,
            kind,
            cause = %cause,
            restore_failures = restore_errors.len(),
            rollback_clean = restore_errors.is_empty(),
            "Transaction rolled back"
        ),
        other => error!(code, kind, error = %other, "Command failed"),
    }
}

/// Canonical managed root with the lock held and leftovers from a crashed run cleared.
fn prepare_root(cfg: &mut Config, fs: &dyn FileSystem) -> Result<Option<RootLock>> {
    validate_and_normalize(cfg)?;
    if cfg.dry_run {
        return Ok(None);
    }
    let lock = try_acquire_root_lock(&cfg.managed_root)
        .with_context(|| format!("lock managed root '{}'", cfg.managed_root.display()))?
        .with_context(|| {
            format!(
                "another kb-migrate run holds the lock on '{}'",
                cfg.managed_root.display()
            )
        })?;
    let removed = cleanup_orphan_temps(fs, &cfg.managed_root)?;
    if !removed.is_empty() {
        warn!(count = removed.len(), "Removed temp files left by an interrupted run");
    }
    Ok(Some(lock))
}

fn run_batch(cfg: &Config, fs: Arc<dyn FileSystem>, batch: OperationBatch) -> Result<TransactionResult> {
    let engine = TransactionalMigrationEngine::new(fs).with_options(cfg.engine_options());
    let result = engine.apply(&cfg.managed_root(), batch);

    let verb = if result.dry_run { "would " } else { "" };
    for op in &result.applied_operations {
        out::print_user(&format!("{verb}{}", op.describe()));
    }
    for file in &result.rewritten_files {
        out::print_user(&format!("{verb}rewrite links in {}", to_slash(file)));
    }
    for e in &result.link_errors {
        out::print_warn(&e.to_string());
    }
    let result = result.into_result()?;
    let summary = format!(
        "{} operation(s), {} link(s) rewritten in {} file(s)",
        result.applied_operations.len(),
        result.rewritten_links,
        result.rewritten_files.len()
    );
    if result.dry_run {
        out::print_info(&format!("Dry-run: {summary}; nothing was changed"));
    } else {
        out::print_success(&format!("Committed {summary}"));
    }
    info!(
        operations = result.applied_operations.len(),
        links = result.rewritten_links,
        link_errors = result.link_errors.len(),
        dry_run = result.dry_run,
        "Transaction finished"
    );
    Ok(result)
}

fn cmd_apply(mut cfg: Config, batch_path: &Path, manifest_out: Option<&Path>) -> Result<ExitCode> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
    let text = fs::read_to_string(batch_path)
        .with_context(|| format!("read batch file '{}'", batch_path.display()))?;
    let batch = OperationBatch::from_json(&text)?;

    let _lock = prepare_root(&mut cfg, fs.as_ref())?;
    run_batch(&cfg, fs.clone(), batch)?;

    if let Some(path) = manifest_out
        && !cfg.dry_run
    {
        let exclude = relative_to(&cfg.managed_root, path).into_iter().collect::<Vec<_>>();
        let manifest = IntegrityVerifier::new(fs.clone())
            .with_exclusions(exclude)
            .build_manifest(&cfg.managed_root)?;
        write_manifest(fs.as_ref(), path, &manifest)?;
        out::print_info(&format!("Manifest of {} file(s) written to {}", manifest.total_files, path.display()));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_manifest(root: &Path, out_path: Option<&Path>, mut exclude: Vec<String>) -> Result<ExitCode> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
    let root = dunce::canonicalize(root).with_context(|| format!("resolve root '{}'", root.display()))?;
    if let Some(p) = out_path {
        exclude.extend(relative_to(&root, p));
    }
    let manifest = IntegrityVerifier::new(fs.clone())
        .with_exclusions(exclude)
        .build_manifest(&root)?;
    match out_path {
        Some(p) => {
            write_manifest(fs.as_ref(), p, &manifest)?;
            out::print_success(&format!("Manifest of {} file(s) written to {}", manifest.total_files, p.display()));
        }
        None => out::print_user(manifest.to_json()?.trim_end()),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(cfg: &Config, root: &Path, manifest: Option<PathBuf>) -> Result<ExitCode> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
    let root = dunce::canonicalize(root).with_context(|| format!("resolve root '{}'", root.display()))?;
    let manifest_path = manifest.unwrap_or_else(|| root.join(&cfg.manifest_name));
    let manifest = read_manifest(fs.as_ref(), &manifest_path)?;

    let report = IntegrityVerifier::new(fs)
        .with_exclusions(relative_to(&root, &manifest_path))
        .verify(&root, &manifest)?;
    print_report(&report);
    if report.is_intact() {
        out::print_success(&format!("{} file(s) verified", manifest.entries.len()));
        Ok(ExitCode::SUCCESS)
    } else {
        out::print_error(&format!("Verification found {} problem(s)", report.problem_count()));
        Ok(ExitCode::from(1))
    }
}

fn print_report(report: &VerificationReport) {
    for m in &report.manifest_errors {
        out::print_finding("manifest", m);
    }
    for p in &report.missing {
        out::print_finding("missing", p);
    }
    for p in &report.unexpected {
        out::print_finding("unexpected", p);
    }
    for c in &report.corrupted {
        out::print_finding(
            "corrupted",
            &format!("{} (expected {} bytes, found {})", c.path, c.expected_size, c.actual_size),
        );
    }
}

fn cmd_sync(mut cfg: Config, source: &Path, prune: bool) -> Result<ExitCode> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
    let source = dunce::canonicalize(source).with_context(|| format!("resolve source '{}'", source.display()))?;
    let _lock = prepare_root(&mut cfg, fs.as_ref())?;

    let options = SyncOptions {
        prune,
        exclude: vec![cfg.manifest_name.clone()],
    };
    let batch = plan_sync(fs.clone(), &source, &cfg.managed_root, &options)?;
    if batch.is_empty() {
        out::print_success("Already up to date");
        return Ok(ExitCode::SUCCESS);
    }
    run_batch(&cfg, fs, batch)?;
    Ok(ExitCode::SUCCESS)
}

/// `path` as a root-relative `/`-separated string, when it lies under `root`.
fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    let parent = abs.parent().and_then(|p| dunce::canonicalize(p).ok())?;
    let full = parent.join(abs.file_name()?);
    full.strip_prefix(root).ok().map(to_slash)
}
