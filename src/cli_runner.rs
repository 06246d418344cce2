//! Command dispatch shared by the `fstree` binary: logging setup, interrupt
//! wiring and the three subcommands.

use crate::capture;
use crate::cli::{self, Commands};
use crate::codec;
use crate::config::{CaptureConfig, RestoreConfig};
use crate::error::SnapshotError;
use crate::restore::{self, CommandFetcher};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    setup_logging(args.verbose);

    match &args.command {
        Commands::Capture { base, exclude, out, strict } => {
            let config = CaptureConfig::from_args(base, exclude, out.clone(), *strict)?;
            run_capture(&config)?;
        }
        Commands::Restore { snapshot, origin, dest, workers, pause_ms, links } => {
            let config = RestoreConfig::from_args(snapshot, origin, dest, *workers, *pause_ms, (*links).into())?;
            run_restore(&config)?;
        }
        Commands::List { snapshot } => {
            let file = File::open(snapshot).map_err(|e| SnapshotError::io(snapshot, e))?;
            run_list(BufReader::new(file))?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout may carry the snapshot document.
fn setup_logging(verbose: bool) {
    let default = if verbose { "fstree=debug,warn" } else { "fstree=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run_capture(config: &CaptureConfig) -> Result<(), SnapshotError> {
    let start = Instant::now();
    let snapshot = capture::capture(&config.base, &config.options())?;

    match &config.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| SnapshotError::io(path, e))?;
            let mut writer = BufWriter::new(file);
            codec::write_snapshot(&mut writer, &snapshot)?;
            writer.flush().map_err(|e| SnapshotError::io(path, e))?;
            info!(path = %path.display(), elapsed_ms = start.elapsed().as_millis() as u64, "snapshot written");
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            codec::write_snapshot(&mut writer, &snapshot)?;
            writer.write_all(b"\n").and_then(|_| writer.flush()).map_err(|e| SnapshotError::io("<stdout>", e))?;
        }
    }
    Ok(())
}

fn run_restore(config: &RestoreConfig) -> Result<(), SnapshotError> {
    let file = File::open(&config.snapshot).map_err(|e| SnapshotError::io(&config.snapshot, e))?;
    // Fails on a version mismatch before any work is dispatched.
    let snapshot = codec::read_snapshot(BufReader::new(file))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| SnapshotError::Config(format!("failed to set signal handler: {e}")))?;

    let fetcher = CommandFetcher::new(config.fetch_program.clone(), Arc::clone(&shutdown));
    let report = restore::restore(&snapshot, config.target(), config.pool_options(), &fetcher, shutdown)?;

    println!(
        "restored {} items: {} fetched, {} already present, {} links, {} permission failures",
        report.processed,
        report.fetched,
        report.already_present,
        report.links_created,
        report.permission_failures
    );
    for path in &report.unresolved {
        warn!(path = %path.display(), "unresolved");
    }

    if report.interrupted {
        return Err(SnapshotError::Interrupted);
    }
    Ok(())
}

fn run_list<R: io::Read>(reader: R) -> Result<(), SnapshotError> {
    let snapshot = codec::read_snapshot(reader)?;
    let stats = snapshot.stats();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut result = writeln!(
        out,
        "{} files, {} directories, {} links, {} bytes",
        stats.files, stats.directories, stats.links, snapshot.size
    );
    snapshot.visit(|parents, node| {
        if result.is_ok() {
            let mut path = parents.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&node.name);
            if node.is_dir() {
                path.push('/');
            }
            result = writeln!(out, "{path}");
        }
    });
    result.and_then(|_| out.flush()).map_err(|e| SnapshotError::io("<stdout>", e))
}
