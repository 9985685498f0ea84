//! CLI entry point for the preserver tool.

use anyhow::{Context, Result};
use clap::Parser;
use preserver_core::{ComponentRegistry, load_config};
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let runtime = config.build(&ComponentRegistry::with_builtins())?;
    info!(config = %args.config.display(), units = runtime.router.units().len(), "Preserver starting");

    match &args.command {
        Command::Fetch(fetch) => commands::run_fetch_command(&runtime, fetch).await,
        Command::List(list) => commands::run_list_command(&runtime, list),
        Command::Cat(cat) => commands::run_cat_command(&runtime, cat),
        Command::Hash(hash) => commands::run_hash_command(&runtime, hash),
        Command::Units => commands::run_units_command(&runtime),
    }
}
