//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Fetch, inspect and route preserved web content.
///
/// Preserver stores fetched URLs in per-unit versioned repositories and
/// exposes them as a URL-ordered tree with archive members virtualized.
#[derive(Parser, Debug)]
#[command(name = "preserver")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file declaring unit types and units
    #[arg(short, long, global = true, default_value = "preserver.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch URLs into a unit
    Fetch(FetchArgs),
    /// List the stored leaves of a unit
    List(ListArgs),
    /// Write the content stored for a URL to stdout
    Cat(CatArgs),
    /// Hash the content of a unit
    Hash(HashArgs),
    /// List configured units
    Units,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FetchArgs {
    /// Unit id or name
    pub unit: String,

    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ListArgs {
    /// Unit id or name
    pub unit: String,

    /// Expand container archives into their members
    #[arg(short, long)]
    pub members: bool,

    /// Include excluded and content-less nodes
    #[arg(short, long)]
    pub all: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CatArgs {
    /// URL, or `<container>!/<member>` for an archive member
    pub url: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct HashArgs {
    /// Unit id or name
    pub unit: String,

    /// Abandon the hash after this many seconds (1-86400)
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=86400))]
    pub timeout: Option<u64>,
}
