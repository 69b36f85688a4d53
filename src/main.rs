use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod commands;

use cli::Args;
use commands::utils::init_logging;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(commands::run_command(args))
}
