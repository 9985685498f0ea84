//! Constants for the fetch pipeline (timeouts, retries, limits).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of retries reported for retryable outcomes.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default delay between retries reported for retryable outcomes.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Maximum Retry-After value honored (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default maximum length of a redirect chain.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default cap on a fetched body (512 MiB).
pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 512 * 1024 * 1024;

