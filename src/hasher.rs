//! Integrity hashing of a content subtree.
//!
//! # Overview
//!
//! [`ContentHasher`] walks a set's content-hash nodes in pre-order and
//! feeds one frame per node into a SHA-256 digest: the URL prefixed with
//! its length as a big-endian `u64`, then a presence byte and, for nodes
//! with content, the filtered length and the SHA-256 of the filtered
//! content. Every field has a known size, so distinct node sequences never
//! produce the same input. The elapsed time and outcome of every pass are
//! recorded on the set so later passes can be scheduled from the running
//! estimate.

use std::io::Read;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::tree::{CachedUrlSet, HashOutcome, TreeError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from a hash pass.
#[derive(Debug, Error)]
pub enum HashError {
    /// The pass exceeded its time budget.
    #[error("hash of {url} timed out after {elapsed:?}")]
    Timeout { url: String, elapsed: Duration },

    /// A node could not be listed or opened.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Reading a leaf's content failed part way.
    #[error("failed reading {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSummary {
    /// Lower-case hex SHA-256.
    pub digest: String,
    /// Nodes covered.
    pub nodes: usize,
    /// Nodes that contributed content.
    pub leaves_with_content: usize,
    /// Filtered content bytes hashed.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// SHA-256 hasher over a content subtree.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    timeout: Option<Duration>,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandons a pass that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Hashes `set` and records the pass on it.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Timeout`] past the time budget, or the tree or
    /// read error that stopped the pass.
    #[instrument(skip(self, set), fields(spec = %set.spec()))]
    pub fn hash(&self, set: &CachedUrlSet) -> Result<HashSummary, HashError> {
        let started = Instant::now();
        let result = self.hash_nodes(set, started);
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => HashOutcome::Completed,
            Err(HashError::Timeout { .. }) => HashOutcome::TimedOut,
            Err(e) => HashOutcome::Failed(e.to_string()),
        };
        set.store_actual_hash_duration(elapsed, outcome);

        let summary = result?;
        info!(
            digest = %summary.digest,
            nodes = summary.nodes,
            bytes = summary.bytes,
            elapsed_ms = elapsed.as_millis(),
            "hash complete"
        );
        Ok(HashSummary { elapsed, ..summary })
    }

    fn hash_nodes(&self, set: &CachedUrlSet, started: Instant) -> Result<HashSummary, HashError> {
        let mut digest = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut nodes = 0;
        let mut leaves_with_content = 0;
        let mut bytes = 0u64;

        for node in set.content_hash_nodes()? {
            self.check_deadline(set, started)?;
            nodes += 1;

            let leaf = set.tree().cached_url(node.url())?;
            if !leaf.has_content() {
                update_node(&mut digest, node.url(), None);
                continue;
            }
            leaves_with_content += 1;
            let mut content = Sha256::new();
            let mut length = 0u64;
            let mut reader = leaf.open_for_hashing()?;
            loop {
                let read = reader.read(&mut buf).map_err(|source| HashError::Io {
                    url: node.url().to_string(),
                    source,
                })?;
                if read == 0 {
                    break;
                }
                content.update(&buf[..read]);
                length += read as u64;
                self.check_deadline(set, started)?;
            }
            update_node(&mut digest, node.url(), Some((length, content.finalize().as_slice())));
            bytes += length;
            debug!(url = %node.url(), length, "hashed");
        }

        Ok(HashSummary {
            digest: digest
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
            nodes,
            leaves_with_content,
            bytes,
            elapsed: started.elapsed(),
        })
    }

    fn check_deadline(&self, set: &CachedUrlSet, started: Instant) -> Result<(), HashError> {
        match self.timeout {
            Some(limit) if started.elapsed() > limit => Err(HashError::Timeout {
                url: set.url().to_string(),
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

/// Feeds one node frame. `content` is the filtered length and its digest.
fn update_node(digest: &mut Sha256, url: &str, content: Option<(u64, &[u8])>) {
    digest.update((url.len() as u64).to_be_bytes());
    digest.update(url.as_bytes());
    match content {
        None => digest.update([0u8]),
        Some((length, content_digest)) => {
            digest.update([1u8]);
            digest.update(length.to_be_bytes());
            digest.update(content_digest);
        }
    }
}
