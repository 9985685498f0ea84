//! Fetch command handler: fetch URLs into one unit.

use std::sync::Arc;

use anyhow::{Result, bail};
use preserver_core::{FetchResult, HttpClient, Runtime, UrlFetcher, fetch_with_retry};
use tracing::{debug, info, warn};

use super::find_unit;
use crate::cli::FetchArgs;

pub async fn run_fetch_command(runtime: &Runtime, args: &FetchArgs) -> Result<()> {
    let unit = find_unit(&runtime.router, &args.unit)?;
    let client = HttpClient::new(&runtime.client_settings)?;

    let mut fetched = 0usize;
    let mut failed = 0usize;
    for url in &args.urls {
        if !unit.should_be_cached(url) {
            warn!(url = %url, unit = %unit.id(), "URL is outside the unit's crawl rules, skipping");
            failed += 1;
            continue;
        }

        let mut fetcher = UrlFetcher::new(
            Arc::clone(&unit),
            client.clone(),
            url.as_str(),
            runtime.fetch_options,
        );
        match fetch_with_retry(&mut fetcher).await {
            Ok(result) => {
                if result == FetchResult::Fetched {
                    runtime.router.flush_negative_cache(&unit);
                    fetched += 1;
                }
                debug!(url = %url, redirects = fetcher.redirect_chain().len(), "fetch done");
                println!("{result}\t{url}");
            }
            Err((e, attempts)) => {
                failed += 1;
                println!("failed\t{url}\t{e}");
                if e.is_fatal() {
                    warn!(url = %url, attempts, kind = %e.kind(), "fatal fetch error, stopping");
                    break;
                }
            }
        }
    }

    info!(fetched, failed, total = args.urls.len(), "Fetch complete");
    if failed > 0 {
        bail!("{failed} of {} URLs failed", args.urls.len());
    }
    Ok(())
}
