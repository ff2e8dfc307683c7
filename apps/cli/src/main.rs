//! noticeharvest CLI — batch collection of government announcements.
//!
//! Drives the external per-site collectors over a date-partitioned tree,
//! deduplicates everything they find, and reconciles disk against store.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
