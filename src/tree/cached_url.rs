//! Leaf nodes of the content tree.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::archive::{ArchiveEntry, ArchiveFormat};
use crate::repository::{Properties, VersionInfo};

use super::{ContentTree, MEMBER_SEPARATOR, TreeError};

/// URL under which the content was stored.
pub const PROPERTY_NODE_URL: &str = "x-lockss-node-url";
/// Final URL the content was served from, after redirects.
pub const PROPERTY_CONTENT_URL: &str = "x-lockss-content-url";
/// URL originally requested.
pub const PROPERTY_ORIG_URL: &str = "x-lockss-orig-url";
/// Fetch time in milliseconds since the Unix epoch.
pub const PROPERTY_FETCH_TIME: &str = "x-lockss-fetch-time";
/// Next URL in the redirect chain, for names stored along the way.
pub const PROPERTY_REDIRECTED_TO: &str = "x-lockss-redirected-to";
pub const PROPERTY_CONTENT_TYPE: &str = "content-type";
pub const PROPERTY_CONTENT_LENGTH: &str = "content-length";
pub const PROPERTY_LAST_MODIFIED: &str = "last-modified";

static EMPTY_PROPERTIES: Properties = Properties::new();

#[derive(Clone)]
enum LeafBody {
    Stored(Option<VersionInfo>),
    Member {
        content: Arc<[u8]>,
        properties: Properties,
    },
}

/// A single URL's content, pinned to one version.
///
/// Leaves are cheap handles; content is only read when opened. Leaves for
/// archive members hold their extracted bytes.
#[derive(Clone)]
pub struct CachedUrl {
    tree: Arc<ContentTree>,
    url: String,
    body: LeafBody,
}

impl fmt::Debug for CachedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedUrl")
            .field("url", &self.url)
            .field("version", &self.version())
            .field("member", &self.is_archive_member())
            .finish_non_exhaustive()
    }
}

impl CachedUrl {
    pub(crate) fn stored(tree: Arc<ContentTree>, url: String, version: Option<VersionInfo>) -> Self {
        Self {
            tree,
            url,
            body: LeafBody::Stored(version),
        }
    }

    pub(crate) fn member(
        tree: Arc<ContentTree>,
        url: String,
        entry: &ArchiveEntry,
        content: Vec<u8>,
    ) -> Self {
        let mut properties = Properties::new();
        properties.insert(PROPERTY_NODE_URL.to_string(), url.clone());
        properties.insert(PROPERTY_CONTENT_LENGTH.to_string(), content.len().to_string());
        if let Some(content_type) = guess_content_type(&entry.name) {
            properties.insert(PROPERTY_CONTENT_TYPE.to_string(), content_type.to_string());
        }
        if let Some(modified) = entry.modified {
            properties.insert(
                PROPERTY_LAST_MODIFIED.to_string(),
                httpdate::fmt_http_date(modified),
            );
        }
        Self {
            tree,
            url,
            body: LeafBody::Member {
                content: Arc::from(content),
                properties,
            },
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The tree this leaf belongs to.
    #[must_use]
    pub fn tree(&self) -> &Arc<ContentTree> {
        &self.tree
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        match &self.body {
            LeafBody::Stored(version) => version.is_some(),
            LeafBody::Member { .. } => true,
        }
    }

    /// Repository version this leaf reads, `None` for members and empty leaves.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        match &self.body {
            LeafBody::Stored(version) => version.as_ref().map(|v| v.version),
            LeafBody::Member { .. } => None,
        }
    }

    #[must_use]
    pub fn content_size(&self) -> Option<u64> {
        match &self.body {
            LeafBody::Stored(version) => version.as_ref().map(|v| v.size),
            LeafBody::Member { content, .. } => Some(content.len() as u64),
        }
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        match &self.body {
            LeafBody::Stored(Some(version)) => &version.properties,
            LeafBody::Stored(None) => &EMPTY_PROPERTIES,
            LeafBody::Member { properties, .. } => properties,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.properties().get(PROPERTY_CONTENT_TYPE).map(String::as_str)
    }

    #[must_use]
    pub fn is_archive_member(&self) -> bool {
        matches!(self.body, LeafBody::Member { .. })
    }

    /// Archive decoder for this leaf, if it is a recognized container.
    #[must_use]
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        self.tree
            .archive_types()
            .format_of(&self.url, self.content_type())
    }

    /// Opens the raw content.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotFound`] if the leaf has no content, or a
    /// repository error if the stored bytes cannot be opened.
    pub fn open_content(&self) -> Result<Box<dyn Read + Send>, TreeError> {
        match &self.body {
            LeafBody::Stored(Some(version)) => Ok(self
                .tree
                .repository()
                .open(&self.url, version.version)?),
            LeafBody::Stored(None) => Err(TreeError::not_found(&self.url)),
            LeafBody::Member { content, .. } => Ok(Box::new(Cursor::new(Arc::clone(content)))),
        }
    }

    /// Opens the content through the unit's hash filter.
    ///
    /// # Errors
    ///
    /// Same as [`CachedUrl::open_content`].
    pub fn open_for_hashing(&self) -> Result<Box<dyn Read + Send>, TreeError> {
        let raw = self.open_content()?;
        Ok(self.tree.hash_filter().filter(self.content_type(), raw))
    }

    /// Reads the whole raw content into memory.
    ///
    /// # Errors
    ///
    /// Same as [`CachedUrl::open_content`], plus read failures.
    pub fn read_content(&self) -> Result<Vec<u8>, TreeError> {
        if let LeafBody::Member { content, .. } = &self.body {
            return Ok(content.to_vec());
        }
        let mut reader = self.open_content()?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| TreeError::io(&self.url, e))?;
        Ok(buf)
    }

    /// Resolves a member of this leaf, which must be a container archive.
    ///
    /// # Errors
    ///
    /// See [`ContentTree::resolve_leaf`].
    pub fn archive_member(&self, member_path: &str) -> Result<CachedUrl, TreeError> {
        self.tree
            .resolve_leaf(&format!("{}{MEMBER_SEPARATOR}{member_path}", self.url))
    }
}

/// MIME type inferred from a member's file name.
pub(crate) fn guess_content_type(name: &str) -> Option<&'static str> {
    let extension = name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match extension.as_str() {
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "tgz" | "gz" => "application/gzip",
        _ => return None,
    })
}
