use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use capture_kernel::{FsStore, StoreStatus};

/// Print a JSON summary of a capture store.
#[derive(Parser, Debug)]
#[command(author, version)]
struct Args {
    /// Store directory.
    #[arg(long, env = "CAPTURE_STORE_DIR", default_value = "data")]
    store_dir: PathBuf,
    /// Pretty-print the JSON.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = FsStore::open_existing(&args.store_dir)?;
    let status = StoreStatus::collect(&store)?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&status)?
    } else {
        serde_json::to_string(&status)?
    };
    println!("{}", json);
    Ok(())
}
