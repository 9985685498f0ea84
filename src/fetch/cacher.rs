//! Committing fetched content into a unit's content tree.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument, warn};

use super::error::{CacheException, CacheExceptionKind};
use crate::au::ArchivalUnit;
use crate::repository::Properties;
use crate::tree::{
    PROPERTY_CONTENT_LENGTH, PROPERTY_CONTENT_URL, PROPERTY_FETCH_TIME, PROPERTY_NODE_URL,
    PROPERTY_ORIG_URL, PROPERTY_REDIRECTED_TO,
};

/// A complete response body ready to be stored.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// URL that was requested.
    pub origin_url: String,
    /// Followed redirect targets, in order, excluding directory redirects.
    pub redirect_chain: Vec<String>,
    /// URL the content was finally served from.
    pub final_url: String,
    /// Lower-cased response headers.
    pub headers: Properties,
    pub body: Vec<u8>,
    pub fetch_time: SystemTime,
}

/// What a successful store did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReport {
    /// Names the content was committed under, with their new versions.
    pub stored: Vec<(String, u32)>,
    /// Warning raised while storing, if any.
    pub warning: Option<CacheExceptionKind>,
}

/// Validates fetched content and commits it, once per stored name.
#[derive(Debug, Clone)]
pub struct UrlCacher {
    unit: Arc<ArchivalUnit>,
}

impl UrlCacher {
    #[must_use]
    pub fn new(unit: Arc<ArchivalUnit>) -> Self {
        Self { unit }
    }

    /// Stores `content`.
    ///
    /// An empty body is stored with a warning. A body whose length differs
    /// from the `Content-Length` header is not stored and reported as a
    /// retry-same-url failure. Under a store-all redirect scheme the
    /// content is committed under the requested URL and every redirect
    /// target; otherwise under the requested URL only.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheException`] for length mismatches and repository
    /// failures.
    #[instrument(skip(self, content), fields(url = %content.origin_url, bytes = content.body.len()))]
    pub fn store(&self, content: &FetchedContent) -> Result<StoreReport, CacheException> {
        let map = self.unit.result_map();
        let actual = content.body.len() as u64;

        if let Some(expected) = content
            .headers
            .get(PROPERTY_CONTENT_LENGTH)
            .and_then(|value| value.trim().parse::<u64>().ok())
            && expected != actual
        {
            return Err(map.exception(
                CacheExceptionKind::RetrySameUrl,
                &content.origin_url,
                format!("wrong length: expected {expected} bytes, got {actual}"),
            ));
        }

        let mut warning = None;
        if content.body.is_empty() {
            warn!(url = %content.origin_url, "empty file stored");
            warning = Some(CacheExceptionKind::WarningOnly);
        }

        let mut names = vec![content.origin_url.clone()];
        names.extend(content.redirect_chain.iter().cloned());
        let store_count = if self.unit.redirect_scheme().stores_all() {
            names.len()
        } else {
            1
        };

        let fetch_time = content
            .fetch_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();

        let repository = self.unit.tree().repository();
        let mut stored = Vec::with_capacity(store_count);
        for (index, name) in names.iter().take(store_count).enumerate() {
            let mut properties = content.headers.clone();
            properties.insert(PROPERTY_NODE_URL.to_string(), name.clone());
            properties.insert(PROPERTY_CONTENT_URL.to_string(), content.final_url.clone());
            properties.insert(PROPERTY_ORIG_URL.to_string(), content.origin_url.clone());
            properties.insert(PROPERTY_FETCH_TIME.to_string(), fetch_time.clone());
            if let Some(next) = names.get(index + 1) {
                properties.insert(PROPERTY_REDIRECTED_TO.to_string(), next.clone());
            }

            let info = repository
                .commit(name, &content.body, &properties)
                .map_err(|e| {
                    CacheException::new(CacheExceptionKind::Repository, name.as_str(), e.to_string())
                })?;
            debug!(name = %name, version = info.version, "stored");
            stored.push((name.clone(), info.version));
        }

        Ok(StoreReport { stored, warning })
    }
}
