//! HTTP transport for the fetch pipeline.
//!
//! This module provides the [`HttpClient`] wrapper, which issues single
//! GET requests without following redirects (the fetcher applies the
//! unit's redirect policy itself) and reads bodies with a size cap.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE};
use reqwest::{Client, Response, redirect};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::repository::Properties;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("preserver/", env!("CARGO_PKG_VERSION"));

/// Transport-level failures, before any result code exists.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request or body read exceeded its timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// DNS, connection, TLS or protocol failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The URL is not a valid absolute URL.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The body exceeded the configured cap.
    #[error("body of {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    /// The client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Timeouts and identity for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Shared HTTP client; cheap to clone, reuses pooled connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with redirects disabled.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the TLS backend or system
    /// configuration cannot be initialized.
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.read_timeout_secs))
            .gzip(true)
            .redirect(redirect::Policy::none())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|source| TransportError::Build { source })?;
        Ok(Self { client })
    }

    /// Sends one GET request, optionally conditional.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for invalid URLs, timeouts and network
    /// failures. HTTP error statuses are not errors here.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str, if_modified_since: Option<&str>) -> Result<Response, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::InvalidUrl {
            url: url.to_string(),
        })?;
        let mut request = self.client.get(parsed);
        if let Some(date) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, date);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        debug!(status = response.status().as_u16(), "response received");
        Ok(response)
    }

    /// Streams the body into memory, failing once it exceeds `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TooLarge`] past the cap, or a timeout or
    /// network error if the stream breaks.
    pub async fn read_body(response: Response, url: &str, limit: u64) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::from_reqwest(url, e))?;
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(TransportError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Converts response headers to lower-cased properties, joining repeated
/// headers with `", "`.
#[must_use]
pub fn headers_to_properties(headers: &HeaderMap) -> Properties {
    let mut properties = Properties::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        properties
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    properties
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_headers_to_properties_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("content-type", HeaderValue::from_static("text/html"));
        headers.append("vary", HeaderValue::from_static("a"));
        headers.append("vary", HeaderValue::from_static("b"));
        let props = headers_to_properties(&headers);
        assert_eq!(props.get("content-type").unwrap(), "text/html");
        assert_eq!(props.get("vary").unwrap(), "a, b");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let client = HttpClient::new(&ClientSettings::default()).unwrap();
        let err = client.get("not a url", None).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }
}
