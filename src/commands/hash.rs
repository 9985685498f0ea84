//! Hash command handler: digest the whole content of a unit.

use std::time::Duration;

use anyhow::Result;
use preserver_core::{ContentHasher, Runtime};

use super::find_unit;
use crate::cli::HashArgs;

pub fn run_hash_command(runtime: &Runtime, args: &HashArgs) -> Result<()> {
    let unit = find_unit(&runtime.router, &args.unit)?;
    let hasher = match args.timeout {
        Some(secs) => ContentHasher::new().with_timeout(Duration::from_secs(secs)),
        None => ContentHasher::new(),
    };

    let summary = hasher.hash(&unit.root())?;
    println!("{}\t{}", summary.digest, unit.id());
    println!(
        "nodes = {}, with content = {}, bytes = {}, elapsed_ms = {}",
        summary.nodes,
        summary.leaves_with_content,
        summary.bytes,
        summary.elapsed.as_millis()
    );
    Ok(())
}
