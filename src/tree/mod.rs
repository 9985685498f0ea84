//! Hierarchical, spec-addressed content tree of one preservation unit.
//!
//! # Overview
//!
//! The tree is a view over the unit's [`Repository`]: every stored URL is a
//! node, and so is every path prefix of a stored URL below its
//! `scheme://host/` stem. A node with descendants is a [`CachedUrlSet`];
//! a node without is a [`CachedUrl`] leaf. Nodes are ordered in pre-order,
//! which is lexicographic order with `/` sorting before every other byte.
//!
//! Leaves snapshot the repository version current when they were created.
//! A later commit of the same URL produces a new version; leaves already
//! handed out keep reading the old one.
//!
//! Entries of container archives are addressed as `<container>!/<member>`
//! and materialized on demand by [`ContentTree::resolve_leaf`].

mod cached_url;
mod error;
mod member;
mod node;
mod spec;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::archive::{ArchiveTypes, read_member};
use crate::repository::Repository;

pub use cached_url::{
    CachedUrl, PROPERTY_CONTENT_LENGTH, PROPERTY_CONTENT_TYPE, PROPERTY_CONTENT_URL,
    PROPERTY_FETCH_TIME, PROPERTY_LAST_MODIFIED, PROPERTY_NODE_URL, PROPERTY_ORIG_URL,
    PROPERTY_REDIRECTED_TO,
};
pub use error::TreeError;
pub use member::{ArchiveMemberSpec, MAX_ARCHIVE_DEPTH, MEMBER_SEPARATOR};
pub use node::{CachedUrlSet, CachedUrlSetNode, HashOutcome, HashRecord};
pub use spec::{CachedUrlSetSpec, SpecKind, SpecRelation};

/// Stream transformation applied by [`CachedUrl::open_for_hashing`].
///
/// Unit types may strip volatile content (session ids, ads) so hashes of
/// semantically identical pages agree across caches.
pub trait HashFilter: Send + Sync + fmt::Debug {
    /// Wraps `input`, the raw content of a leaf with the given MIME type.
    fn filter(&self, content_type: Option<&str>, input: Box<dyn Read + Send>) -> Box<dyn Read + Send>;
}

/// Filter that hashes content unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl HashFilter for IdentityFilter {
    fn filter(&self, _content_type: Option<&str>, input: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
        input
    }
}

/// Content tree of one unit.
#[derive(Debug)]
pub struct ContentTree {
    au_id: String,
    repository: Arc<dyn Repository>,
    archive_types: Arc<ArchiveTypes>,
    hash_filter: Arc<dyn HashFilter>,
    hash_records: DashMap<String, HashRecord>,
}

impl ContentTree {
    #[must_use]
    pub fn new(
        au_id: impl Into<String>,
        repository: Arc<dyn Repository>,
        archive_types: Arc<ArchiveTypes>,
        hash_filter: Arc<dyn HashFilter>,
    ) -> Self {
        Self {
            au_id: au_id.into(),
            repository,
            archive_types,
            hash_filter,
            hash_records: DashMap::new(),
        }
    }

    #[must_use]
    pub fn au_id(&self) -> &str {
        &self.au_id
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    #[must_use]
    pub fn archive_types(&self) -> &ArchiveTypes {
        &self.archive_types
    }

    pub(crate) fn hash_filter(&self) -> &dyn HashFilter {
        self.hash_filter.as_ref()
    }

    pub(crate) fn hash_records(&self) -> &DashMap<String, HashRecord> {
        &self.hash_records
    }

    /// The node covering the whole unit.
    #[must_use]
    pub fn root(self: &Arc<Self>) -> CachedUrlSet {
        CachedUrlSet::new(Arc::clone(self), CachedUrlSetSpec::au(self.au_id.clone()))
    }

    /// The node described by `spec`.
    #[must_use]
    pub fn cached_url_set(self: &Arc<Self>, spec: CachedUrlSetSpec) -> CachedUrlSet {
        CachedUrlSet::new(Arc::clone(self), spec)
    }

    /// A leaf for an ordinary URL, pinned to its current version. The leaf
    /// exists whether or not content has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the storage layer fails.
    pub fn cached_url(self: &Arc<Self>, url: &str) -> Result<CachedUrl, TreeError> {
        let version = self.repository.current_version(url)?;
        Ok(CachedUrl::stored(Arc::clone(self), url.to_string(), version))
    }

    /// Resolves any URL, including archive-member addresses, to a leaf with
    /// content.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if there is no content at `url` (or, for a
    ///   member address, at the container URL)
    /// - [`TreeError::MemberNotFound`] if the container exists but does not
    ///   hold the member
    /// - [`TreeError::MalformedMemberUrl`] or [`TreeError::UnsupportedArchive`]
    ///   for unusable member addresses
    #[instrument(skip(self), fields(au = %self.au_id))]
    pub fn resolve_leaf(self: &Arc<Self>, url: &str) -> Result<CachedUrl, TreeError> {
        match ArchiveMemberSpec::from_url(url)? {
            None => {
                let leaf = self.cached_url(url)?;
                if leaf.has_content() {
                    Ok(leaf)
                } else {
                    Err(TreeError::not_found(url))
                }
            }
            Some(member) => {
                let container = self.cached_url(member.container_url())?;
                if !container.has_content() {
                    return Err(TreeError::not_found(member.container_url()));
                }
                self.resolve_member(&container, &member)
            }
        }
    }

    fn resolve_member(
        self: &Arc<Self>,
        container: &CachedUrl,
        member: &ArchiveMemberSpec,
    ) -> Result<CachedUrl, TreeError> {
        let mut format = self
            .archive_types
            .format_of(container.url(), container.content_type())
            .ok_or_else(|| TreeError::unsupported_archive(container.url()))?;
        let mut data = container.read_content()?;
        let mut segments = member.path_segments().peekable();
        let mut walked = String::new();

        while let Some(segment) = segments.next() {
            if !walked.is_empty() {
                walked.push_str(MEMBER_SEPARATOR);
            }
            walked.push_str(segment);

            let (entry, bytes) = read_member(format, &data, segment, self.archive_types.limits())
                .map_err(|e| TreeError::archive(member.container_url(), e))?
                .ok_or_else(|| TreeError::member_not_found(member.container_url(), member.member()))?;

            if segments.peek().is_none() {
                debug!(member = %member, size = entry.size, "resolved archive member");
                return Ok(CachedUrl::member(Arc::clone(self), member.to_url(), &entry, bytes));
            }
            format = self
                .archive_types
                .format_of(segment, None)
                .ok_or_else(|| {
                    TreeError::unsupported_archive(format!(
                        "{}{MEMBER_SEPARATOR}{walked}",
                        member.container_url()
                    ))
                })?;
            data = bytes;
        }
        Err(TreeError::malformed(member.to_url(), "empty member path"))
    }

    /// Every node URL of the unit, in pre-order.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Repository`] if the store cannot be listed.
    pub(crate) fn all_node_urls(&self) -> Result<Vec<String>, TreeError> {
        let stored = self.repository.list_urls()?;
        let mut nodes = BTreeSet::new();
        for url in &stored {
            for node in node_and_ancestors(url) {
                nodes.insert(node.to_string());
            }
        }
        let mut nodes: Vec<String> = nodes.into_iter().collect();
        nodes.sort_by(|a, b| preorder_cmp(a, b));
        Ok(nodes)
    }

    /// Node URLs covered by `spec`, in pre-order.
    pub(crate) fn node_urls(&self, spec: &CachedUrlSetSpec) -> Result<Vec<String>, TreeError> {
        let mut nodes = self.all_node_urls()?;
        nodes.retain(|url| spec.contains_node(url));
        Ok(nodes)
    }
}

/// `url` preceded by its stem and every intermediate path prefix.
pub(crate) fn node_and_ancestors(url: &str) -> Vec<&str> {
    let Some(scheme_end) = url.find("://") else {
        return vec![url];
    };
    let host_start = scheme_end + 3;
    let Some(slash) = url[host_start..].find('/') else {
        return vec![url];
    };
    let stem_end = host_start + slash + 1;

    let mut nodes = vec![&url[..stem_end]];
    for (pos, _) in url[stem_end..].match_indices('/') {
        nodes.push(&url[..stem_end + pos]);
    }
    if url.len() > stem_end {
        nodes.push(url);
    }
    nodes
}

/// Parent node URL, or `None` for a stem.
pub(crate) fn parent_url(url: &str) -> Option<&str> {
    let nodes = node_and_ancestors(url);
    nodes.len().checked_sub(2).map(|i| nodes[i])
}

/// Pre-order comparison: lexicographic, with `/` ranked lowest.
pub(crate) fn preorder_cmp(a: &str, b: &str) -> Ordering {
    fn rank(byte: u8) -> u16 {
        if byte == b'/' { 0 } else { u16::from(byte) + 1 }
    }
    a.bytes().map(rank).cmp(b.bytes().map(rank))
}
