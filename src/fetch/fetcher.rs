//! Per-URL fetch state machine.
//!
//! # Overview
//!
//! A [`UrlFetcher`] performs one fetch attempt of one URL for one unit:
//! it issues the request, follows redirects the unit's
//! [`RedirectScheme`](super::RedirectScheme) allows, classifies the final
//! status through the unit's [`HttpResultMap`](super::HttpResultMap) and
//! hands successful content to a [`UrlCacher`]. It never retries; a
//! retryable outcome is returned to the caller with its retry count and
//! delay attached.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use preserver_core::au::ArchivalUnit;
//! # use preserver_core::fetch::{ClientSettings, FetchOptions, FetchResult, HttpClient, UrlFetcher};
//! # async fn run(unit: Arc<ArchivalUnit>) -> anyhow::Result<()> {
//! let client = HttpClient::new(&ClientSettings::default())?;
//! let mut fetcher = UrlFetcher::new(unit, client, "http://example.com/a.html", FetchOptions::default());
//! match fetcher.fetch().await {
//!     Ok(FetchResult::Fetched) => println!("stored"),
//!     Ok(other) => println!("{other:?}"),
//!     Err(e) if e.is_retryable() => println!("retry later: {e}"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::cacher::{FetchedContent, UrlCacher};
use super::client::{HttpClient, TransportError, headers_to_properties};
use super::constants::{DEFAULT_MAX_CONTENT_BYTES, DEFAULT_MAX_REDIRECTS};
use super::error::{CacheException, CacheExceptionKind};
use super::result_map::{Classification, HttpResultMap, ResponseInfo};
use crate::au::ArchivalUnit;
use crate::tree::PROPERTY_LAST_MODIFIED;

/// Outcome of a fetch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// New content was committed.
    Fetched,
    /// The server reported the stored version is current.
    FetchedNotModified,
    /// Nothing was stored, without failing the fetch.
    NotFetched,
}

impl fmt::Display for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetched => "fetched",
            Self::FetchedNotModified => "not modified",
            Self::NotFetched => "not fetched",
        };
        f.write_str(name)
    }
}

/// Where a fetcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Unopened,
    Requesting,
    Success,
    /// Ended on a redirect that was not followed.
    Redirected,
    Failed,
}

/// Per-fetch limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    /// Report transport timeouts as fatal instead of retryable.
    pub fatal_on_timeout: bool,
    /// Largest body accepted.
    pub max_content_bytes: u64,
    /// Send `If-Modified-Since` when a version is already stored.
    pub conditional: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            fatal_on_timeout: false,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            conditional: true,
        }
    }
}

/// Fetches one URL into one unit.
#[derive(Debug)]
pub struct UrlFetcher {
    unit: Arc<ArchivalUnit>,
    client: HttpClient,
    url: String,
    options: FetchOptions,
    state: FetchState,
    redirect_chain: Vec<String>,
}

impl UrlFetcher {
    #[must_use]
    pub fn new(
        unit: Arc<ArchivalUnit>,
        client: HttpClient,
        url: impl Into<String>,
        options: FetchOptions,
    ) -> Self {
        Self {
            unit,
            client,
            url: url.into(),
            options,
            state: FetchState::Unopened,
            redirect_chain: Vec::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Redirect targets followed by the last fetch, in order.
    #[must_use]
    pub fn redirect_chain(&self) -> &[String] {
        &self.redirect_chain
    }

    /// Returns the fetcher to its unopened state so it can be reused.
    pub fn reset(&mut self) {
        self.state = FetchState::Unopened;
        self.redirect_chain.clear();
    }

    /// Performs the fetch.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheException`] classifying the failure. A fetcher that
    /// has already been used without [`reset`](Self::reset) fails with
    /// [`CacheExceptionKind::FetcherInUse`].
    #[instrument(skip(self), fields(url = %self.url, unit = %self.unit.id()))]
    pub async fn fetch(&mut self) -> Result<FetchResult, CacheException> {
        if self.state != FetchState::Unopened {
            return Err(CacheException::new(
                CacheExceptionKind::FetcherInUse,
                self.url.as_str(),
                "fetcher must be reset before reuse",
            ));
        }
        self.state = FetchState::Requesting;
        self.redirect_chain.clear();

        let result = self.run().await;
        self.state = match &result {
            Ok(_) => FetchState::Success,
            Err(e) if e.kind().is_new_url() => FetchState::Redirected,
            Err(_) => FetchState::Failed,
        };
        match &result {
            Ok(outcome) => info!(%outcome, "fetch finished"),
            Err(e) => warn!(kind = %e.kind(), error = %e, "fetch failed"),
        }
        result
    }

    async fn run(&mut self) -> Result<FetchResult, CacheException> {
        let unit = Arc::clone(&self.unit);
        let map = unit.result_map();
        let if_modified_since = self.stored_last_modified(map)?;

        let mut current = self.url.clone();
        let mut redirects = 0usize;
        loop {
            let conditional = if current == self.url {
                if_modified_since.as_deref()
            } else {
                None
            };
            let response = self
                .client
                .get(&current, conditional)
                .await
                .map_err(|e| self.transport_exception(map, e))?;
            let status = response.status();
            let headers = headers_to_properties(response.headers());

            if status == StatusCode::NOT_MODIFIED && conditional.is_some() {
                debug!("stored version is current");
                return Ok(FetchResult::FetchedNotModified);
            }

            let location = if status.is_redirection() {
                headers.get("location").cloned()
            } else {
                None
            };
            let redirect = location.and_then(|location| {
                let info = ResponseInfo::new(&current, status.as_u16(), &headers);
                match map.classify_or_unknown(&info) {
                    Classification::Exception(e) if e.kind().is_new_url() => Some((location, e)),
                    _ => None,
                }
            });

            if let Some((location, e)) = redirect {
                let target = resolve_location(&current, &location).ok_or_else(|| {
                    map.exception(
                        CacheExceptionKind::MalformedUrl,
                        &current,
                        format!("bad redirect location {location:?}"),
                    )
                    .with_status(status.as_u16())
                })?;
                let e = e.with_new_url(target.clone());

                redirects += 1;
                if redirects > self.options.max_redirects {
                    warn!(max = self.options.max_redirects, to = %target, "redirect limit reached");
                    return Err(e);
                }

                if is_directory_redirect(&current, &target) {
                    debug!(to = %target, "following directory redirect");
                    current = target;
                    continue;
                }

                match unit
                    .redirect_scheme()
                    .check(&current, &target, |to| unit.should_be_cached(to))
                {
                    Ok(()) => {
                        debug!(from = %current, to = %target, "following redirect");
                        self.redirect_chain.push(target.clone());
                        current = target;
                        continue;
                    }
                    Err(None) => return Err(e),
                    Err(Some(kind)) => {
                        return Err(map
                            .exception(kind, &self.url, format!("redirect to {target}"))
                            .with_status(status.as_u16())
                            .with_new_url(target));
                    }
                }
            }

            let body = HttpClient::read_body(response, &current, self.options.max_content_bytes)
                .await
                .map_err(|e| self.transport_exception(map, e))?;
            let info = ResponseInfo::new(&current, status.as_u16(), &headers).with_body(&body);
            let warning = match map.classify_or_unknown(&info) {
                Classification::Success => None,
                Classification::Exception(e) => match e.kind() {
                    CacheExceptionKind::WarningOnly => Some(e),
                    CacheExceptionKind::NoStoreWarningOnly => {
                        warn!(error = %e, "not storing");
                        return Ok(FetchResult::NotFetched);
                    }
                    _ => return Err(e),
                },
            };
            if let Some(e) = warning {
                warn!(error = %e, "storing with warning");
            }

            let content = FetchedContent {
                origin_url: self.url.clone(),
                redirect_chain: self.redirect_chain.clone(),
                final_url: current,
                headers,
                body,
                fetch_time: SystemTime::now(),
            };
            UrlCacher::new(Arc::clone(&unit)).store(&content)?;
            return Ok(FetchResult::Fetched);
        }
    }

    fn stored_last_modified(&self, map: &HttpResultMap) -> Result<Option<String>, CacheException> {
        if !self.options.conditional {
            return Ok(None);
        }
        let leaf = self.unit.cached_url(&self.url).map_err(|e| {
            map.exception(CacheExceptionKind::Repository, &self.url, e.to_string())
        })?;
        Ok(leaf.properties().get(PROPERTY_LAST_MODIFIED).cloned())
    }

    fn transport_exception(&self, map: &HttpResultMap, error: TransportError) -> CacheException {
        let message = error.to_string();
        match error {
            TransportError::Timeout { .. } => {
                let e = map.exception(CacheExceptionKind::RetryableNetwork, &self.url, message);
                if self.options.fatal_on_timeout {
                    e.into_fatal()
                } else {
                    e
                }
            }
            TransportError::Network { .. } => {
                map.exception(CacheExceptionKind::RetryableNetwork, &self.url, message)
            }
            TransportError::InvalidUrl { .. } => {
                map.exception(CacheExceptionKind::MalformedUrl, &self.url, message)
            }
            TransportError::TooLarge { .. } | TransportError::Build { .. } => {
                map.exception(CacheExceptionKind::UnexpectedNoRetry, &self.url, message)
            }
        }
    }
}

fn resolve_location(base: &str, location: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(location.trim()).ok().map(String::from)
}

/// `http://x/dir` redirecting to `http://x/dir/` is not recorded as a
/// separate name.
fn is_directory_redirect(from: &str, to: &str) -> bool {
    to.strip_suffix('/') == Some(from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_location() {
        assert_eq!(
            resolve_location("http://x/a/b.html", "../c.html").unwrap(),
            "http://x/c.html"
        );
        assert_eq!(
            resolve_location("http://x/a", "http://y/b").unwrap(),
            "http://y/b"
        );
    }

    #[test]
    fn test_directory_redirect() {
        assert!(is_directory_redirect("http://x/dir", "http://x/dir/"));
        assert!(!is_directory_redirect("http://x/dir", "http://x/other/"));
    }

    #[test]
    fn test_default_options() {
        let options = FetchOptions::default();
        assert_eq!(options.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(!options.fatal_on_timeout);
        assert!(options.conditional);
    }
}
