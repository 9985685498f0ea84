//! Subtree membership predicates.
//!
//! A [`CachedUrlSetSpec`] names the set of URLs belonging to one node of a
//! unit's content tree: the whole unit, a URL prefix optionally narrowed by
//! a regular expression, or exactly one URL.
//!
//! # Example
//!
//! ```
//! use preserver_core::tree::{CachedUrlSetSpec, SpecRelation};
//!
//! let parent = CachedUrlSetSpec::subtree("http://example.com/a");
//! let child = CachedUrlSetSpec::subtree("http://example.com/a/b");
//! assert!(parent.matches("http://example.com/a/b/c.html"));
//! assert_eq!(parent.relation(&child), SpecRelation::Above);
//! assert_eq!(child.relation(&parent), SpecRelation::Below);
//! ```

use std::fmt;

use regex::Regex;

use super::member::MEMBER_SEPARATOR;

/// The flavor of a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    /// Every URL of the owning unit.
    Au,
    /// A URL prefix, optionally narrowed by a pattern.
    Subtree,
    /// Exactly one URL, without descendants.
    SingleNode,
}

/// Hierarchical relation between two specs of the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecRelation {
    /// The first spec is an ancestor of the second.
    Above,
    /// The first spec is a descendant of the second.
    Below,
    /// Same node, provably disjoint membership.
    SameLevelNoOverlap,
    /// Same node, possibly overlapping membership.
    SameLevelOverlap,
    /// Unrelated.
    NoRelation,
}

impl SpecRelation {
    /// Returns the relation seen from the other side.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Above => Self::Below,
            Self::Below => Self::Above,
            other => other,
        }
    }
}

/// Immutable membership predicate for a content tree node.
#[derive(Debug, Clone)]
pub struct CachedUrlSetSpec {
    kind: SpecKind,
    url: String,
    pattern: Option<Regex>,
}

impl PartialEq for CachedUrlSetSpec {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.url == other.url
            && self.pattern.as_ref().map(Regex::as_str) == other.pattern.as_ref().map(Regex::as_str)
    }
}

impl Eq for CachedUrlSetSpec {}

impl CachedUrlSetSpec {
    /// Spec covering the whole unit identified by `au_id`.
    #[must_use]
    pub fn au(au_id: impl Into<String>) -> Self {
        Self {
            kind: SpecKind::Au,
            url: au_id.into(),
            pattern: None,
        }
    }

    /// Spec covering every URL starting with `prefix`.
    #[must_use]
    pub fn subtree(prefix: impl Into<String>) -> Self {
        Self {
            kind: SpecKind::Subtree,
            url: prefix.into(),
            pattern: None,
        }
    }

    /// Spec covering URLs starting with `prefix` that also match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn subtree_matching(prefix: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            kind: SpecKind::Subtree,
            url: prefix.into(),
            pattern: Some(Regex::new(pattern)?),
        })
    }

    /// Spec covering exactly one URL.
    #[must_use]
    pub fn single_node(url: impl Into<String>) -> Self {
        Self {
            kind: SpecKind::SingleNode,
            url: url.into(),
            pattern: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SpecKind {
        self.kind
    }

    /// The prefix, the single URL, or the unit id for [`SpecKind::Au`].
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    #[must_use]
    pub fn is_au(&self) -> bool {
        self.kind == SpecKind::Au
    }

    #[must_use]
    pub fn is_single_node(&self) -> bool {
        self.kind == SpecKind::SingleNode
    }

    /// True if the pattern narrows the prefix.
    #[must_use]
    pub fn is_range_restricted(&self) -> bool {
        self.pattern.is_some()
    }

    /// Membership test: prefix plus optional pattern.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self.kind {
            SpecKind::Au => true,
            SpecKind::SingleNode => url == self.url,
            SpecKind::Subtree => url.starts_with(&self.url) && self.pattern_allows(url),
        }
    }

    /// Membership test that respects path boundaries, used when walking the
    /// tree so that `http://x/a` does not claim its sibling `http://x/ab`.
    #[must_use]
    pub fn contains_node(&self, url: &str) -> bool {
        match self.kind {
            SpecKind::Au => true,
            SpecKind::SingleNode => url == self.url,
            SpecKind::Subtree => is_path_within(url, &self.url) && self.pattern_allows(url),
        }
    }

    /// True if every URL this spec's node can hold is also held by `self`'s
    /// node, with `other` strictly deeper or equal.
    #[must_use]
    pub fn subsumes(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (SpecKind::Au, _) => true,
            (_, SpecKind::Au) => false,
            (SpecKind::SingleNode, SpecKind::SingleNode) => self.url == other.url,
            (SpecKind::SingleNode, SpecKind::Subtree) => false,
            (SpecKind::Subtree, SpecKind::SingleNode) => self.contains_node(&other.url),
            (SpecKind::Subtree, SpecKind::Subtree) => {
                normalized(&other.url).starts_with(&normalized(&self.url))
                    && match (&self.pattern, &other.pattern) {
                        (None, _) => true,
                        (Some(a), Some(b)) => a.as_str() == b.as_str(),
                        (Some(_), None) => false,
                    }
            }
        }
    }

    /// True if the two specs provably share no URL. Regex patterns are
    /// never intersected, so two subtrees rooted on the same path are
    /// conservatively assumed to overlap.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (SpecKind::Au, _) | (_, SpecKind::Au) => false,
            (SpecKind::SingleNode, SpecKind::SingleNode) => self.url != other.url,
            (SpecKind::SingleNode, SpecKind::Subtree) => !other.contains_node(&self.url),
            (SpecKind::Subtree, SpecKind::SingleNode) => !self.contains_node(&other.url),
            (SpecKind::Subtree, SpecKind::Subtree) => {
                let a = normalized(&self.url);
                let b = normalized(&other.url);
                !a.starts_with(&b) && !b.starts_with(&a)
            }
        }
    }

    /// Computes the hierarchical relation of `self` to `other`.
    ///
    /// `a.relation(b)` is always `b.relation(a).inverse()`.
    #[must_use]
    pub fn relation(&self, other: &Self) -> SpecRelation {
        if self.is_au() || other.is_au() {
            return if self == other {
                SpecRelation::SameLevelOverlap
            } else if self.is_au() && other.is_au() {
                SpecRelation::NoRelation
            } else if self.is_au() {
                SpecRelation::Above
            } else {
                SpecRelation::Below
            };
        }

        let url1 = normalized(&self.url);
        let url2 = normalized(&other.url);
        if url1 == url2 {
            return if self.is_disjoint(other) {
                SpecRelation::SameLevelNoOverlap
            } else {
                SpecRelation::SameLevelOverlap
            };
        }
        if self.subsumes(other) {
            return SpecRelation::Above;
        }
        if other.subsumes(self) {
            return SpecRelation::Below;
        }
        if (self.is_single_node() || other.is_single_node())
            && (url1.starts_with(&url2) || url2.starts_with(&url1))
        {
            return SpecRelation::SameLevelNoOverlap;
        }
        SpecRelation::NoRelation
    }

    /// Stable text key, used to index per-node bookkeeping.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }

    fn pattern_allows(&self, url: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(url))
    }
}

impl fmt::Display for CachedUrlSetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.pattern) {
            (SpecKind::Au, _) => write!(f, "[AU {}]", self.url),
            (SpecKind::SingleNode, _) => write!(f, "[SN {}]", self.url),
            (SpecKind::Subtree, None) => write!(f, "[{}]", self.url),
            (SpecKind::Subtree, Some(re)) => write!(f, "[{} ~ {}]", self.url, re.as_str()),
        }
    }
}

fn normalized(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// True if `url` is `prefix` itself or a path descendant of it. Archive
/// members count as descendants of their container.
pub(crate) fn is_path_within(url: &str, prefix: &str) -> bool {
    let Some(rest) = url.strip_prefix(prefix) else {
        return false;
    };
    rest.is_empty()
        || prefix.ends_with('/')
        || rest.starts_with('/')
        || rest.starts_with(MEMBER_SEPARATOR)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn samples() -> Vec<CachedUrlSetSpec> {
        vec![
            CachedUrlSetSpec::au("plugin&base_url~http%3A%2F%2Fx%2F"),
            CachedUrlSetSpec::subtree("http://x/"),
            CachedUrlSetSpec::subtree("http://x/a"),
            CachedUrlSetSpec::subtree("http://x/a/"),
            CachedUrlSetSpec::subtree("http://x/a/b"),
            CachedUrlSetSpec::subtree("http://x/c"),
            CachedUrlSetSpec::subtree_matching("http://x/a", r"\.pdf$").unwrap(),
            CachedUrlSetSpec::subtree_matching("http://x/a", r"\.html$").unwrap(),
            CachedUrlSetSpec::single_node("http://x/a"),
            CachedUrlSetSpec::single_node("http://x/a/b"),
            CachedUrlSetSpec::single_node("http://x/c/d"),
        ]
    }

    #[test]
    fn test_relation_is_consistent_in_both_directions() {
        let specs = samples();
        for a in &specs {
            for b in &specs {
                assert_eq!(
                    a.relation(b),
                    b.relation(a).inverse(),
                    "relation between {a} and {b} is not consistent"
                );
            }
        }
    }

    #[test]
    fn test_relation_parent_and_child() {
        let parent = CachedUrlSetSpec::subtree("http://x/a");
        let child = CachedUrlSetSpec::subtree("http://x/a/b");
        assert_eq!(parent.relation(&child), SpecRelation::Above);
        assert_eq!(child.relation(&parent), SpecRelation::Below);
    }

    #[test]
    fn test_relation_au_is_above_everything() {
        let au = CachedUrlSetSpec::au("id");
        let sub = CachedUrlSetSpec::subtree("http://x/");
        assert_eq!(au.relation(&sub), SpecRelation::Above);
        assert_eq!(au.relation(&au.clone()), SpecRelation::SameLevelOverlap);
    }

    #[test]
    fn test_relation_same_level() {
        let a = CachedUrlSetSpec::subtree("http://x/a");
        let a_slash = CachedUrlSetSpec::subtree("http://x/a/");
        assert_eq!(a.relation(&a_slash), SpecRelation::SameLevelOverlap);

        let single = CachedUrlSetSpec::single_node("http://x/a");
        let pdfs = CachedUrlSetSpec::subtree_matching("http://x/a", r"\.pdf$").unwrap();
        assert_eq!(single.relation(&pdfs), SpecRelation::SameLevelNoOverlap);
    }

    #[test]
    fn test_relation_single_node_above_subtree_url() {
        let single = CachedUrlSetSpec::single_node("http://x/a");
        let deeper = CachedUrlSetSpec::subtree("http://x/a/b");
        assert_eq!(single.relation(&deeper), SpecRelation::SameLevelNoOverlap);
        assert_eq!(deeper.relation(&single), SpecRelation::SameLevelNoOverlap);
    }

    #[test]
    fn test_relation_unrelated_siblings() {
        let a = CachedUrlSetSpec::subtree("http://x/a");
        let c = CachedUrlSetSpec::subtree("http://x/c");
        assert_eq!(a.relation(&c), SpecRelation::NoRelation);
    }

    #[test]
    fn test_matches_prefix_and_pattern() {
        let spec = CachedUrlSetSpec::subtree_matching("http://x/a", r"\.pdf$").unwrap();
        assert!(spec.matches("http://x/a/1.pdf"));
        assert!(!spec.matches("http://x/a/1.html"));
        assert!(!spec.matches("http://y/a/1.pdf"));
    }

    #[test]
    fn test_contains_node_respects_path_boundaries() {
        let spec = CachedUrlSetSpec::subtree("http://x/a");
        assert!(spec.matches("http://x/ab"));
        assert!(!spec.contains_node("http://x/ab"));
        assert!(spec.contains_node("http://x/a/b"));
        assert!(spec.contains_node("http://x/a!/m.txt"));
    }

    #[test]
    fn test_single_node_matches_only_itself() {
        let spec = CachedUrlSetSpec::single_node("http://x/a");
        assert!(spec.matches("http://x/a"));
        assert!(!spec.matches("http://x/a/b"));
    }
}
