//! Filtered iteration over a unit's content tree.
//!
//! # Overview
//!
//! [`CuIterator`] yields the leaves of one subtree lazily, in pre-order.
//! Two independent filters apply:
//!
//! - `content_only` skips nodes with no stored content.
//! - `included_only` skips URLs the unit's current crawl rules no longer
//!   include, and URLs an optional global exclusion predicate rejects.
//!
//! Every skipped candidate is counted in [`CuIterator::excluded_count`].
//! [`ArchiveMemberIterator`] wraps a `CuIterator` and replaces recognized
//! container archives with their members.
//!
//! Node URLs are listed when the iterator is created. Each leaf is pinned
//! to the version current at the moment it is reached, so content
//! committed concurrently to nodes not yet visited is seen.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use preserver_core::au::ArchivalUnit;
//! use preserver_core::iter::{CuIterable, IterOptions};
//!
//! # fn run(unit: Arc<ArchivalUnit>) -> Result<(), preserver_core::tree::TreeError> {
//! let mut leaves = unit.cu_iterator(IterOptions::default())?;
//! for leaf in leaves.by_ref() {
//!     println!("{}", leaf.url());
//! }
//! println!("{} skipped", leaves.excluded_count());
//! # Ok(())
//! # }
//! ```

mod archive;

use std::fmt;
use std::sync::Arc;

use tracing::warn;

pub use archive::ArchiveMemberIterator;

use crate::au::ArchivalUnit;
use crate::tree::{CachedUrl, CachedUrlSetSpec, TreeError};

/// Predicate naming URLs the crawl driver excludes from every unit.
pub type GlobalExclusion = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Iteration filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterOptions {
    /// Skip nodes without stored content.
    pub content_only: bool,
    /// Skip URLs no longer included by the unit's crawl rules.
    pub included_only: bool,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            content_only: true,
            included_only: true,
        }
    }
}

impl IterOptions {
    /// Every node, with or without content, regardless of current rules.
    #[must_use]
    pub fn all() -> Self {
        Self {
            content_only: false,
            included_only: false,
        }
    }
}

/// Lazy, single-pass sequence of leaves under one spec.
pub struct CuIterator {
    unit: Arc<ArchivalUnit>,
    spec: CachedUrlSetSpec,
    pending: std::vec::IntoIter<String>,
    options: IterOptions,
    global_exclusion: Option<GlobalExclusion>,
    excluded: usize,
}

impl fmt::Debug for CuIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CuIterator")
            .field("unit", self.unit.id())
            .field("spec", &self.spec)
            .field("remaining", &self.pending.len())
            .field("options", &self.options)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

impl CuIterator {
    /// Lists the nodes under `spec` and returns an iterator over them.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the store cannot be listed.
    pub fn new(
        unit: Arc<ArchivalUnit>,
        spec: CachedUrlSetSpec,
        options: IterOptions,
    ) -> Result<Self, TreeError> {
        let urls = unit.tree().node_urls(&spec)?;
        Ok(Self {
            unit,
            spec,
            pending: urls.into_iter(),
            options,
            global_exclusion: None,
            excluded: 0,
        })
    }

    /// Also skips URLs `predicate` accepts, when `included_only` is set.
    #[must_use]
    pub fn with_global_exclusion(mut self, predicate: GlobalExclusion) -> Self {
        self.global_exclusion = Some(predicate);
        self
    }

    /// Candidates filtered out so far.
    #[must_use]
    pub fn excluded_count(&self) -> usize {
        self.excluded
    }

    #[must_use]
    pub fn spec(&self) -> &CachedUrlSetSpec {
        &self.spec
    }

    #[must_use]
    pub fn unit(&self) -> &Arc<ArchivalUnit> {
        &self.unit
    }

    pub(crate) fn count_excluded(&mut self) {
        self.excluded += 1;
    }

    fn is_included(&self, url: &str) -> bool {
        if !self.unit.should_be_cached(url) {
            return false;
        }
        !self
            .global_exclusion
            .as_ref()
            .is_some_and(|excluded| excluded(url))
    }
}

impl Iterator for CuIterator {
    type Item = CachedUrl;

    fn next(&mut self) -> Option<CachedUrl> {
        loop {
            let url = self.pending.next()?;
            if self.options.included_only && !self.is_included(&url) {
                self.excluded += 1;
                continue;
            }
            let leaf = match self.unit.cached_url(&url) {
                Ok(leaf) => leaf,
                Err(e) => {
                    warn!(url = %url, error = %e, "skipping unreadable node");
                    self.excluded += 1;
                    continue;
                }
            };
            if self.options.content_only && !leaf.has_content() {
                self.excluded += 1;
                continue;
            }
            return Some(leaf);
        }
    }
}

/// Sources of leaf iterators.
pub trait CuIterable {
    /// Leaves under `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the store cannot be listed.
    fn subtree_iterator(
        &self,
        spec: CachedUrlSetSpec,
        options: IterOptions,
    ) -> Result<CuIterator, TreeError>;

    /// Leaves of the whole unit.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the store cannot be listed.
    fn cu_iterator(&self, options: IterOptions) -> Result<CuIterator, TreeError>;

    /// Leaves of the whole unit with container archives expanded into their
    /// members.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the store cannot be listed.
    fn archive_member_iterator(&self, options: IterOptions) -> Result<ArchiveMemberIterator, TreeError> {
        Ok(ArchiveMemberIterator::new(self.cu_iterator(options)?))
    }
}

impl CuIterable for Arc<ArchivalUnit> {
    fn subtree_iterator(
        &self,
        spec: CachedUrlSetSpec,
        options: IterOptions,
    ) -> Result<CuIterator, TreeError> {
        CuIterator::new(Arc::clone(self), spec, options)
    }

    fn cu_iterator(&self, options: IterOptions) -> Result<CuIterator, TreeError> {
        let spec = CachedUrlSetSpec::au(self.id().as_str());
        CuIterator::new(Arc::clone(self), spec, options)
    }

    fn archive_member_iterator(&self, options: IterOptions) -> Result<ArchiveMemberIterator, TreeError> {
        let unchanged_after = self.exclude_unchanged_after();
        Ok(ArchiveMemberIterator::new(self.cu_iterator(options)?).with_unchanged_after(unchanged_after))
    }
}
