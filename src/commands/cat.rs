//! Cat command handler: route a URL and write its content to stdout.

use std::io::{self, Write};

use anyhow::{Result, bail};
use preserver_core::{ContentReq, Runtime};
use tracing::debug;

use crate::cli::CatArgs;

pub fn run_cat_command(runtime: &Runtime, args: &CatArgs) -> Result<()> {
    let Some(cu) = runtime
        .router
        .find_cached_url(&args.url, ContentReq::HasContent)
    else {
        bail!("no configured unit holds content for {}", args.url);
    };
    debug!(url = %cu.url(), unit = %cu.tree().au_id(), "routed");

    let content = cu.read_content()?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&content)?;
    stdout.flush()?;
    Ok(())
}
