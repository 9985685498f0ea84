//! Fetch outcome failures.
//!
//! Every non-success outcome of a fetch is a [`CacheException`]: a kind
//! plus three independent attributes the crawl orchestrator acts on.
//!
//! - *retryable*: carries a retry count and a delay between retries
//! - *fail*: nothing is stored and the crawl is later marked unsuccessful
//! - *fatal*: the crawl of the unit stops immediately
//!
//! The pipeline only reports these; it never sleeps or retries itself.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Retry parameters carried by a retryable exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySpec {
    pub count: u32,
    pub delay: Duration,
}

/// Classified fetch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheExceptionKind {
    /// Transient server condition; retry the same URL.
    RetrySameUrl,
    /// Transport failure (connection, timeout, DNS).
    RetryableNetwork,
    /// Permanent redirect that was not followed.
    RetryNewUrlPermanent,
    /// Temporary redirect that was not followed.
    RetryNewUrlTemporary,
    /// Code the crawler has no handling for.
    Unimplemented,
    /// Anticipated failure such as 403 or 410.
    ExpectedNoRetry,
    /// 404.
    NotFound,
    /// Failure the server should not have produced.
    UnexpectedNoRetry,
    /// Access denied in a way that invalidates the whole crawl.
    Permission,
    /// Explicit abort decision from a result map or handler.
    AbortCrawl,
    /// Redirect target outside the unit's crawl rules.
    RedirectOutsideCrawlSpec,
    /// Redirect target on another host.
    RedirectOffHost,
    /// URL could not be parsed.
    MalformedUrl,
    /// Content could not be committed.
    Repository,
    /// Result code absent from every result map.
    UnknownCode,
    /// Store the content but log a warning.
    WarningOnly,
    /// Log a warning and store nothing.
    NoStoreWarningOnly,
    /// The fetcher was reused without a reset.
    FetcherInUse,
}

impl CacheExceptionKind {
    /// Stable snake-case name, also accepted in result map configuration.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RetrySameUrl => "retry_same_url",
            Self::RetryableNetwork => "retryable_network",
            Self::RetryNewUrlPermanent => "retry_new_url_permanent",
            Self::RetryNewUrlTemporary => "retry_new_url_temporary",
            Self::Unimplemented => "unimplemented",
            Self::ExpectedNoRetry => "expected",
            Self::NotFound => "not_found",
            Self::UnexpectedNoRetry => "unexpected",
            Self::Permission => "permission",
            Self::AbortCrawl => "abort_crawl",
            Self::RedirectOutsideCrawlSpec => "redirect_outside_crawl_spec",
            Self::RedirectOffHost => "redirect_off_host",
            Self::MalformedUrl => "malformed_url",
            Self::Repository => "repository",
            Self::UnknownCode => "unknown_code",
            Self::WarningOnly => "warning",
            Self::NoStoreWarningOnly => "no_store_warning",
            Self::FetcherInUse => "fetcher_in_use",
        }
    }

    /// Parses a configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|kind| kind.name() == name)
    }

    /// True for redirect outcomes that carry a new URL.
    #[must_use]
    pub fn is_new_url(self) -> bool {
        matches!(
            self,
            Self::RetryNewUrlPermanent
                | Self::RetryNewUrlTemporary
                | Self::RedirectOutsideCrawlSpec
                | Self::RedirectOffHost
        )
    }

    pub(crate) fn attributes(self) -> Attributes {
        let (retry, fail, fatal) = match self {
            Self::RetrySameUrl | Self::RetryableNetwork => (true, true, false),
            Self::RetryNewUrlPermanent
            | Self::RetryNewUrlTemporary
            | Self::RedirectOutsideCrawlSpec
            | Self::RedirectOffHost
            | Self::MalformedUrl
            | Self::WarningOnly
            | Self::NoStoreWarningOnly => (false, false, false),
            Self::Unimplemented
            | Self::ExpectedNoRetry
            | Self::NotFound
            | Self::UnexpectedNoRetry
            | Self::Repository
            | Self::FetcherInUse => (false, true, false),
            Self::Permission | Self::AbortCrawl | Self::UnknownCode => (false, true, true),
        };
        Attributes {
            retry,
            fail,
            fatal,
            no_store: !matches!(self, Self::WarningOnly),
        }
    }
}

const ALL_KINDS: &[CacheExceptionKind] = &[
    CacheExceptionKind::RetrySameUrl,
    CacheExceptionKind::RetryableNetwork,
    CacheExceptionKind::RetryNewUrlPermanent,
    CacheExceptionKind::RetryNewUrlTemporary,
    CacheExceptionKind::Unimplemented,
    CacheExceptionKind::ExpectedNoRetry,
    CacheExceptionKind::NotFound,
    CacheExceptionKind::UnexpectedNoRetry,
    CacheExceptionKind::Permission,
    CacheExceptionKind::AbortCrawl,
    CacheExceptionKind::RedirectOutsideCrawlSpec,
    CacheExceptionKind::RedirectOffHost,
    CacheExceptionKind::MalformedUrl,
    CacheExceptionKind::Repository,
    CacheExceptionKind::UnknownCode,
    CacheExceptionKind::WarningOnly,
    CacheExceptionKind::NoStoreWarningOnly,
    CacheExceptionKind::FetcherInUse,
];

impl fmt::Display for CacheExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Attributes {
    pub retry: bool,
    pub fail: bool,
    pub fatal: bool,
    pub no_store: bool,
}

/// A classified fetch failure (or warning) with its policy attributes.
#[derive(Debug, Clone, Error)]
#[error("{kind} fetching {url}: {message}")]
pub struct CacheException {
    kind: CacheExceptionKind,
    url: String,
    message: String,
    status: Option<u16>,
    retry: Option<RetrySpec>,
    fail: bool,
    fatal: bool,
    no_store: bool,
    new_url: Option<String>,
}

impl CacheException {
    /// Builds an exception with the default attributes of `kind`. Retryable
    /// kinds start without retry parameters; see [`CacheException::with_retry`].
    pub fn new(kind: CacheExceptionKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        let attrs = kind.attributes();
        Self {
            kind,
            url: url.into(),
            message: message.into(),
            status: None,
            retry: None,
            fail: attrs.fail,
            fatal: attrs.fatal,
            no_store: attrs.no_store,
            new_url: None,
        }
    }

    /// Sets the retry parameters.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches the redirect target.
    #[must_use]
    pub fn with_new_url(mut self, new_url: impl Into<String>) -> Self {
        self.new_url = Some(new_url.into());
        self
    }

    /// Marks the exception fatal, for fatal-on-timeout crawls.
    #[must_use]
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self.fail = true;
        self
    }

    #[must_use]
    pub fn kind(&self) -> CacheExceptionKind {
        self.kind
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Result code that produced the exception, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn retry(&self) -> Option<RetrySpec> {
        self.retry
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retry.is_some_and(|r| r.count > 0)
    }

    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.fail
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// True if the content must not be stored.
    #[must_use]
    pub fn is_no_store(&self) -> bool {
        self.no_store
    }

    #[must_use]
    pub fn new_url(&self) -> Option<&str> {
        self.new_url.as_deref()
    }
}
