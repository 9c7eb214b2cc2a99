//! captured - budgeted capture + compression daemon
//!
//! This daemon:
//! 1. Loads the pipeline config (file, env, then CLI flags)
//! 2. Opens the shared store directory
//! 3. Runs the capture and compression stages until the deadline, restarting
//!    the pair if both end early
//! 4. Logs a store summary on exit
//!
//! Ctrl-C cancels the run; both stages stop at their next poll.

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capture_kernel::{logging, FsStore, PipelineConfig, RunToken, Supervisor, SystemClock};

#[derive(Parser, Debug)]
#[command(author, version, about = "Budgeted capture + cloud-mask compression daemon")]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "CAPTURE_CONFIG")]
    config: Option<PathBuf>,
    /// Shared store directory.
    #[arg(long)]
    store_dir: Option<PathBuf>,
    /// Wall-clock budget for the whole run.
    #[arg(long)]
    max_runtime_secs: Option<u64>,
    /// Storage quota for the store directory.
    #[arg(long)]
    quota_bytes: Option<u64>,
}

fn main() -> Result<()> {
    let started = Local::now();
    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("CAPTURE_CONFIG", path);
    }
    let mut cfg = PipelineConfig::load()?;
    if let Some(dir) = args.store_dir {
        cfg.store_dir = dir;
    }
    if let Some(secs) = args.max_runtime_secs {
        cfg.max_runtime = Duration::from_secs(secs);
    }
    if let Some(bytes) = args.quota_bytes {
        cfg.store_quota_bytes = bytes;
    }
    cfg.validate()?;

    let log_path = logging::init(cfg.log_dir.as_deref(), started)?;
    if let Some(path) = &log_path {
        log::info!("logging to {}", path.display());
    }
    log::info!(
        "captured {} starting: store={} quota={} bytes runtime={}s camera={} model={}",
        env!("CARGO_PKG_VERSION"),
        cfg.store_dir.display(),
        cfg.store_quota_bytes,
        cfg.max_runtime.as_secs(),
        cfg.camera.source,
        cfg.model.backend
    );

    let store = Arc::new(FsStore::open(&cfg.store_dir)?);
    let token = Arc::new(RunToken::new(Arc::new(SystemClock::new()), cfg.max_runtime));
    {
        let token = Arc::clone(&token);
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, stopping at next poll");
            token.cancel();
        })
        .map_err(|e| anyhow!("failed to install interrupt handler: {}", e))?;
    }

    let supervisor = Supervisor::from_config(&cfg, store, token);
    let runs = supervisor.run_until_deadline();

    let committed: u64 = runs.iter().map(|run| run.capture.items_committed).sum();
    let written: u64 = runs.iter().map(|run| run.capture.bytes_written).sum();
    let processed: u64 = runs.iter().map(|run| run.compression.processed).sum();
    let skipped: u64 = runs.iter().map(|run| run.compression.skipped).sum();
    log::info!(
        "captured finished after {} run(s): {} items ({} bytes) captured, {} masked, {} skipped",
        runs.len(),
        committed,
        written,
        processed,
        skipped
    );
    Ok(())
}
