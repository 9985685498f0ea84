//! Retry loop around a single-attempt [`UrlFetcher`].

use tracing::{debug, info, instrument};

use super::error::CacheException;
use super::fetcher::{FetchResult, UrlFetcher};

/// Fetches until success or a non-retryable outcome.
///
/// A retryable exception carries its own count and delay; the fetcher is
/// reset and tried again after the delay until the count is used up.
/// Fatal exceptions are never retried.
///
/// # Errors
///
/// Returns the last exception and the number of attempts made.
#[instrument(skip(fetcher), fields(url = %fetcher.url()))]
pub async fn fetch_with_retry(
    fetcher: &mut UrlFetcher,
) -> Result<FetchResult, (CacheException, u32)> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, "attempting fetch");

        match fetcher.fetch().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let retry = e.retry().filter(|_| e.is_retryable() && !e.is_fatal());
                match retry {
                    Some(spec) if attempt <= spec.count => {
                        info!(
                            url = %fetcher.url(),
                            attempt = attempt + 1,
                            max_attempts = spec.count + 1,
                            delay_ms = spec.delay.as_millis(),
                            kind = %e.kind(),
                            "retrying fetch"
                        );
                        tokio::time::sleep(spec.delay).await;
                        fetcher.reset();
                    }
                    _ => {
                        debug!(url = %fetcher.url(), kind = %e.kind(), "not retrying fetch");
                        return Err((e, attempt));
                    }
                }
            }
        }
    }
}
