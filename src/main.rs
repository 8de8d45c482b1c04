//! tiercache - inspect and maintain a tiered cache from the shell
//!
//! Opens the configured durable store behind a fresh cache, runs one
//! subcommand and prints its result on stdout. Logs go to stderr.

use std::sync::Arc;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use tiercache::cache::Cache;
use tiercache::cli::{self, Cli, StartupConfig};
use tiercache::store::open_store;
use tiercache::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    telemetry::init(cli.log_format, LevelFilter::WARN)?;

    let startup = StartupConfig::from_cli(&cli)?;
    let store = open_store(&startup.store)?;
    let cache = Arc::new(Cache::with_store(startup.cache, store));

    let output = cli::execute(&cli.command, &cache).await?;
    if !output.is_empty() {
        println!("{output}");
    }

    Ok(())
}
