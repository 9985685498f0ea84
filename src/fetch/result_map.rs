//! Result code classification.
//!
//! # Overview
//!
//! [`HttpResultMap`] maps a numeric result code to a decision: success, or
//! a [`CacheExceptionKind`] whose attributes tell the crawl orchestrator
//! whether to retry, fail or abort. The map starts from a fixed default
//! table; a unit type may replace the entry of any code. An entry may also
//! delegate to a [`CacheResultHandler`] that inspects the response.
//!
//! Codes absent from the map are a [`ClassifyError`], never a success.
//!
//! # Example
//!
//! ```
//! use preserver_core::fetch::{CacheExceptionKind, Classification, HttpResultMap, ResponseInfo};
//! use preserver_core::repository::Properties;
//!
//! let map = HttpResultMap::default();
//! let headers = Properties::new();
//! let response = ResponseInfo::new("http://example.com/a", 503, &headers);
//! match map.classify(&response).unwrap() {
//!     Classification::Exception(e) => {
//!         assert_eq!(e.kind(), CacheExceptionKind::RetrySameUrl);
//!         assert!(e.is_retryable());
//!     }
//!     Classification::Success => unreachable!(),
//! }
//! assert!(map.classify(&ResponseInfo::new("http://example.com/a", 299, &headers)).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::debug;

use super::constants::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY, MAX_RETRY_AFTER};
use super::error::{CacheException, CacheExceptionKind, RetrySpec};
use crate::repository::Properties;

/// What the pipeline knows about a response when classifying it.
#[derive(Debug, Clone, Copy)]
pub struct ResponseInfo<'a> {
    pub url: &'a str,
    pub status: u16,
    /// Lower-cased response headers.
    pub headers: &'a Properties,
    /// Body of an error response, when it was read.
    pub body: Option<&'a [u8]>,
}

impl<'a> ResponseInfo<'a> {
    #[must_use]
    pub fn new(url: &'a str, status: u16, headers: &'a Properties) -> Self {
        Self {
            url,
            status,
            headers,
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Outcome of classifying one response.
#[derive(Debug, Clone)]
pub enum Classification {
    Success,
    Exception(CacheException),
}

/// Fixed decision stored in a result map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Exception(CacheExceptionKind),
}

impl ResultKind {
    /// Parses a configuration name: `success` or an exception kind name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "success" {
            return Some(Self::Success);
        }
        CacheExceptionKind::from_name(name).map(Self::Exception)
    }
}

/// Strategy deciding the outcome of a code from the full response.
pub trait CacheResultHandler: Send + Sync + fmt::Debug {
    /// Classifies `response`. `map` supplies retry parameters.
    fn handle(&self, response: &ResponseInfo<'_>, map: &HttpResultMap) -> Classification;
}

/// A result map entry: fixed decision or handler.
#[derive(Debug, Clone)]
pub enum ResultEntry {
    Fixed(ResultKind),
    Handler(Arc<dyn CacheResultHandler>),
}

/// The result code is not present in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no classification for result code {code}")]
pub struct ClassifyError {
    pub code: u16,
}

/// Retry parameters attached to retryable exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub network_retry_count: u32,
    pub network_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            network_retry_count: DEFAULT_RETRY_COUNT,
            network_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

const DEFAULT_TABLE: &[(&[u16], ResultKind)] = &[
    (&[200, 203], ResultKind::Success),
    (&[301], ResultKind::Exception(CacheExceptionKind::RetryNewUrlPermanent)),
    (&[302, 303, 307], ResultKind::Exception(CacheExceptionKind::RetryNewUrlTemporary)),
    (
        &[408, 413, 500, 502, 503, 504],
        ResultKind::Exception(CacheExceptionKind::RetrySameUrl),
    ),
    (&[300, 204], ResultKind::Exception(CacheExceptionKind::Unimplemented)),
    (
        &[401, 402, 403, 405, 406, 407, 410, 305],
        ResultKind::Exception(CacheExceptionKind::ExpectedNoRetry),
    ),
    (&[404], ResultKind::Exception(CacheExceptionKind::NotFound)),
    (
        &[
            201, 202, 205, 206, 304, 306, 400, 409, 411, 412, 414, 415, 416, 417, 501, 505,
        ],
        ResultKind::Exception(CacheExceptionKind::UnexpectedNoRetry),
    ),
];

/// Immutable code-to-decision table, safe for concurrent use.
#[derive(Debug, Clone)]
pub struct HttpResultMap {
    entries: HashMap<u16, ResultEntry>,
    policy: RetryPolicy,
}

impl Default for HttpResultMap {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl HttpResultMap {
    /// The default table with the given retry parameters.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        let mut entries = HashMap::new();
        for (codes, kind) in DEFAULT_TABLE {
            for code in *codes {
                entries.insert(*code, ResultEntry::Fixed(*kind));
            }
        }
        Self { entries, policy }
    }

    /// Replaces the entries of the given codes.
    #[must_use]
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (u16, ResultEntry)>) -> Self {
        for (code, entry) in overrides {
            self.entries.insert(code, entry);
        }
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Looks up the entry for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] if the code is not mapped.
    pub fn entry(&self, code: u16) -> Result<&ResultEntry, ClassifyError> {
        self.entries.get(&code).ok_or(ClassifyError { code })
    }

    /// Classifies a response.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] if the status code is not mapped.
    pub fn classify(&self, response: &ResponseInfo<'_>) -> Result<Classification, ClassifyError> {
        let classification = match self.entry(response.status)? {
            ResultEntry::Fixed(ResultKind::Success) => Classification::Success,
            ResultEntry::Fixed(ResultKind::Exception(kind)) => Classification::Exception(
                self.exception(*kind, response.url, format!("HTTP {}", response.status))
                    .with_status(response.status),
            ),
            ResultEntry::Handler(handler) => {
                debug!(status = response.status, ?handler, "delegating to result handler");
                handler.handle(response, self)
            }
        };
        Ok(classification)
    }

    /// Classifies a response, turning an unmapped code into an
    /// [`CacheExceptionKind::UnknownCode`] exception.
    #[must_use]
    pub fn classify_or_unknown(&self, response: &ResponseInfo<'_>) -> Classification {
        self.classify(response).unwrap_or_else(|e| {
            Classification::Exception(
                self.exception(CacheExceptionKind::UnknownCode, response.url, e.to_string())
                    .with_status(response.status),
            )
        })
    }

    /// Builds an exception of `kind`, attaching this map's retry parameters
    /// when the kind is retryable.
    #[must_use]
    pub fn exception(
        &self,
        kind: CacheExceptionKind,
        url: &str,
        message: impl Into<String>,
    ) -> CacheException {
        let exception = CacheException::new(kind, url, message);
        if !kind.attributes().retry {
            return exception;
        }
        let retry = if kind == CacheExceptionKind::RetryableNetwork {
            RetrySpec {
                count: self.policy.network_retry_count,
                delay: self.policy.network_retry_delay,
            }
        } else {
            RetrySpec {
                count: self.policy.retry_count,
                delay: self.policy.retry_delay,
            }
        };
        exception.with_retry(retry)
    }
}

/// Retries the same URL after the server's `Retry-After` delay when one is
/// given, otherwise fails as an expected error. Suited to 429 responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryAfterHandler;

impl CacheResultHandler for RetryAfterHandler {
    fn handle(&self, response: &ResponseInfo<'_>, map: &HttpResultMap) -> Classification {
        let message = format!("HTTP {}", response.status);
        let exception = match response.header("retry-after").and_then(parse_retry_after) {
            Some(delay) => map
                .exception(CacheExceptionKind::RetrySameUrl, response.url, message)
                .with_retry(RetrySpec {
                    count: map.policy().retry_count,
                    delay,
                }),
            None => map.exception(CacheExceptionKind::ExpectedNoRetry, response.url, message),
        };
        Classification::Exception(exception.with_status(response.status))
    }
}

/// Parses delta-seconds or an HTTP-date, capped at one hour.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let delay = if let Ok(secs) = value.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        let at = httpdate::parse_http_date(value).ok()?;
        at.duration_since(SystemTime::now()).unwrap_or_default()
    };
    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn kind_of(map: &HttpResultMap, code: u16) -> Option<CacheExceptionKind> {
        let headers = Properties::new();
        match map.classify(&ResponseInfo::new("http://x/a", code, &headers)).unwrap() {
            Classification::Success => None,
            Classification::Exception(e) => Some(e.kind()),
        }
    }

    #[test]
    fn test_default_table() {
        use CacheExceptionKind as K;
        let map = HttpResultMap::default();
        let expected: &[(&[u16], Option<K>)] = &[
            (&[200, 203], None),
            (&[301], Some(K::RetryNewUrlPermanent)),
            (&[302, 303, 307], Some(K::RetryNewUrlTemporary)),
            (&[408, 413, 500, 502, 503, 504], Some(K::RetrySameUrl)),
            (&[300, 204], Some(K::Unimplemented)),
            (&[401, 402, 403, 405, 406, 407, 410, 305], Some(K::ExpectedNoRetry)),
            (&[404], Some(K::NotFound)),
            (
                &[201, 202, 205, 206, 304, 306, 400, 409, 411, 412, 414, 415, 416, 417, 501, 505],
                Some(K::UnexpectedNoRetry),
            ),
        ];
        for (codes, kind) in expected {
            for code in *codes {
                assert_eq!(kind_of(&map, *code), *kind, "code {code}");
            }
        }
    }

    #[test]
    fn test_unmapped_code_fails_loudly() {
        let map = HttpResultMap::default();
        let headers = Properties::new();
        for code in [0, 100, 250, 308, 429, 599, 999] {
            let response = ResponseInfo::new("http://x/a", code, &headers);
            assert_eq!(map.classify(&response).unwrap_err(), ClassifyError { code });
            match map.classify_or_unknown(&response) {
                Classification::Exception(e) => {
                    assert_eq!(e.kind(), CacheExceptionKind::UnknownCode);
                    assert!(e.is_fatal());
                }
                Classification::Success => panic!("unknown code {code} classified as success"),
            }
        }
    }

    #[test]
    fn test_retry_same_url_carries_policy() {
        let map = HttpResultMap::new(RetryPolicy {
            retry_count: 5,
            retry_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        });
        let headers = Properties::new();
        let Classification::Exception(e) =
            map.classify(&ResponseInfo::new("http://x/a", 503, &headers)).unwrap()
        else {
            panic!("503 should not succeed");
        };
        assert_eq!(
            e.retry(),
            Some(RetrySpec {
                count: 5,
                delay: Duration::from_secs(2)
            })
        );
        assert_eq!(e.status(), Some(503));
    }

    #[test]
    fn test_override_replaces_single_code() {
        let map = HttpResultMap::default().with_overrides([
            (404, ResultEntry::Fixed(ResultKind::Exception(CacheExceptionKind::WarningOnly))),
            (299, ResultEntry::Fixed(ResultKind::Success)),
        ]);
        assert_eq!(kind_of(&map, 404), Some(CacheExceptionKind::WarningOnly));
        assert_eq!(kind_of(&map, 299), None);
        assert_eq!(kind_of(&map, 403), Some(CacheExceptionKind::ExpectedNoRetry));
    }

    #[test]
    fn test_retry_after_handler() {
        let map = HttpResultMap::default()
            .with_overrides([(429, ResultEntry::Handler(Arc::new(RetryAfterHandler)))]);

        let mut headers = Properties::new();
        headers.insert("retry-after".to_string(), "7".to_string());
        let Classification::Exception(e) =
            map.classify(&ResponseInfo::new("http://x/a", 429, &headers)).unwrap()
        else {
            panic!("429 should not succeed");
        };
        assert_eq!(e.kind(), CacheExceptionKind::RetrySameUrl);
        assert_eq!(e.retry().unwrap().delay, Duration::from_secs(7));

        let empty = Properties::new();
        let Classification::Exception(e) =
            map.classify(&ResponseInfo::new("http://x/a", 429, &empty)).unwrap()
        else {
            panic!("429 should not succeed");
        };
        assert_eq!(e.kind(), CacheExceptionKind::ExpectedNoRetry);
    }

    #[test]
    fn test_result_kind_names() {
        assert_eq!(ResultKind::from_name("success"), Some(ResultKind::Success));
        assert_eq!(
            ResultKind::from_name("retry_same_url"),
            Some(ResultKind::Exception(CacheExceptionKind::RetrySameUrl))
        );
        assert_eq!(ResultKind::from_name("nope"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_delay() {
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
