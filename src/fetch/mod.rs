//! Fetch/cache pipeline and the HTTP outcome classifier.
//!
//! # Overview
//!
//! - [`HttpResultMap`] maps a status code to a decision: success, or a
//!   [`CacheException`] carrying retry, fail and fatal attributes.
//! - [`RedirectScheme`] decides which redirects are followed and under
//!   which names content is stored.
//! - [`UrlFetcher`] runs one fetch attempt and [`UrlCacher`] commits the
//!   result into the unit's repository.
//!
//! A fetcher makes one attempt. Retryable outcomes carry their retry
//! count and delay; [`fetch_with_retry`] is the loop that honors them.

mod cacher;
mod client;
pub mod constants;
mod error;
mod fetcher;
mod redirect;
mod result_map;
mod retry;

pub use cacher::{FetchedContent, StoreReport, UrlCacher};
pub use client::{ClientSettings, DEFAULT_USER_AGENT, HttpClient, TransportError, headers_to_properties};
pub use error::{CacheException, CacheExceptionKind, RetrySpec};
pub use fetcher::{FetchOptions, FetchResult, FetchState, UrlFetcher};
pub use redirect::{RedirectFlag, RedirectScheme};
pub use result_map::{
    CacheResultHandler, Classification, ClassifyError, HttpResultMap, ResponseInfo, ResultEntry,
    ResultKind, RetryAfterHandler, RetryPolicy,
};
pub use retry::fetch_with_retry;
