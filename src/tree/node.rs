//! Internal nodes of the content tree and hash-duration bookkeeping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{
    CachedUrl, CachedUrlSetSpec, ContentTree, SpecRelation, TreeError, node_and_ancestors,
    parent_url,
};

/// Result of the most recent hash pass over a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    Completed,
    TimedOut,
    Failed(String),
}

/// Latest hash bookkeeping for one node. Only the most recent result is
/// kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRecord {
    /// Scheduling estimate for a full pass.
    pub estimated_duration: Option<Duration>,
    /// Wall time of the most recent pass.
    pub last_duration: Option<Duration>,
    pub last_outcome: Option<HashOutcome>,
}

/// Either kind of content tree node.
#[derive(Debug, Clone)]
pub enum CachedUrlSetNode {
    Set(CachedUrlSet),
    Leaf(CachedUrl),
}

impl CachedUrlSetNode {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Set(set) => set.url(),
            Self::Leaf(leaf) => leaf.url(),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// True if content is stored at the node's own URL.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn has_content(&self) -> Result<bool, TreeError> {
        match self {
            Self::Set(set) => set.has_content(),
            Self::Leaf(leaf) => Ok(leaf.has_content()),
        }
    }

    /// The leaf at this node's URL.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn leaf(&self) -> Result<CachedUrl, TreeError> {
        match self {
            Self::Set(set) => set.tree.cached_url(set.url()),
            Self::Leaf(leaf) => Ok(leaf.clone()),
        }
    }
}

/// Internal node: a spec over one unit's tree.
#[derive(Clone)]
pub struct CachedUrlSet {
    pub(crate) tree: Arc<ContentTree>,
    spec: CachedUrlSetSpec,
}

impl fmt::Debug for CachedUrlSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedUrlSet")
            .field("au", &self.tree.au_id())
            .field("spec", &self.spec)
            .finish()
    }
}

impl CachedUrlSet {
    pub(crate) fn new(tree: Arc<ContentTree>, spec: CachedUrlSetSpec) -> Self {
        Self { tree, spec }
    }

    #[must_use]
    pub fn spec(&self) -> &CachedUrlSetSpec {
        &self.spec
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.spec.url()
    }

    #[must_use]
    pub fn tree(&self) -> &Arc<ContentTree> {
        &self.tree
    }

    /// Spec membership test.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.spec.matches(url)
    }

    /// True if content is stored at the set's own URL. The whole-unit node
    /// never has content of its own.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn has_content(&self) -> Result<bool, TreeError> {
        if self.spec.is_au() {
            return Ok(false);
        }
        Ok(self.tree.repository().current_version(self.url())?.is_some())
    }

    /// Relation to another set; sets of different units are unrelated.
    #[must_use]
    pub fn relation(&self, other: &CachedUrlSet) -> SpecRelation {
        if self.tree.au_id() != other.tree.au_id() {
            return SpecRelation::NoRelation;
        }
        self.spec.relation(&other.spec)
    }

    /// Direct descendants, in pre-order.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn children(&self) -> Result<Vec<CachedUrlSetNode>, TreeError> {
        if self.spec.is_single_node() {
            return Ok(Vec::new());
        }
        let nodes = self.tree.all_node_urls()?;
        let parent = (!self.spec.is_au()).then(|| self.url());

        let mut children = Vec::new();
        for url in nodes
            .iter()
            .filter(|url| parent_url(url) == parent && self.spec.contains_node(url))
        {
            let has_descendants = nodes.iter().any(|n| parent_url(n) == Some(url.as_str()));
            children.push(self.node_for(url, has_descendants)?);
        }
        Ok(children)
    }

    /// Every node an integrity hash of this set must cover, in pre-order:
    /// internal nodes as sets and terminal nodes as leaves. A set whose spec
    /// narrows its prefix with a pattern omits its own node.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn content_hash_nodes(&self) -> Result<Vec<CachedUrlSetNode>, TreeError> {
        let nodes = self.tree.all_node_urls()?;
        let mut with_children = std::collections::HashSet::new();
        for url in &nodes {
            let chain = node_and_ancestors(url);
            if chain.len() > 1 {
                with_children.insert(chain[chain.len() - 2]);
            }
        }

        let mut out = Vec::new();
        for url in nodes.iter().filter(|url| self.spec.contains_node(url)) {
            let has_descendants =
                !self.spec.is_single_node() && with_children.contains(url.as_str());
            out.push(self.node_for(url, has_descendants)?);
        }
        Ok(out)
    }

    fn node_for(&self, url: &str, has_descendants: bool) -> Result<CachedUrlSetNode, TreeError> {
        if has_descendants {
            Ok(CachedUrlSetNode::Set(
                self.tree.cached_url_set(CachedUrlSetSpec::subtree(url)),
            ))
        } else {
            Ok(CachedUrlSetNode::Leaf(self.tree.cached_url(url)?))
        }
    }

    /// Records the duration and outcome of a hash pass over this set.
    ///
    /// A completed pass averages the elapsed time into the estimate. A
    /// timeout raises the estimate to one and a half times the elapsed
    /// time unless it is already larger. Other failures leave the estimate
    /// alone. Single-node sets are not tracked.
    pub fn store_actual_hash_duration(&self, elapsed: Duration, outcome: HashOutcome) {
        if self.spec.is_single_node() {
            return;
        }
        let mut record = self.tree.hash_records().entry(self.spec.key()).or_default();
        let previous = record.estimated_duration;
        record.estimated_duration = match (&outcome, previous) {
            (HashOutcome::Completed, Some(prev)) => Some((prev + elapsed) / 2),
            (HashOutcome::Completed, None) => Some(elapsed),
            (HashOutcome::TimedOut, Some(prev)) if prev >= elapsed => Some(prev),
            (HashOutcome::TimedOut, _) => Some(elapsed.mul_f64(1.5)),
            (HashOutcome::Failed(_), prev) => prev,
        };
        debug!(
            spec = %self.spec,
            elapsed_ms = elapsed.as_millis(),
            estimate_ms = record.estimated_duration.map(|d| d.as_millis()),
            "stored hash duration"
        );
        record.last_duration = Some(elapsed);
        record.last_outcome = Some(outcome);
    }

    /// Current scheduling estimate for hashing this set.
    #[must_use]
    pub fn estimated_hash_duration(&self) -> Option<Duration> {
        self.hash_record().and_then(|r| r.estimated_duration)
    }

    /// Latest hash bookkeeping, if any pass was recorded.
    #[must_use]
    pub fn hash_record(&self) -> Option<HashRecord> {
        self.tree
            .hash_records()
            .get(&self.spec.key())
            .map(|record| record.clone())
    }
}
