//! Archive type registry.
//!
//! Maps a MIME type or a filename extension (including the compound
//! `.tar.gz`) to a canonical extension tag, and a tag to the decoder that
//! handles it.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::ArchiveLimits;

const DEFAULT_TABLE: &[(&str, &str)] = &[
    (".zip", ".zip"),
    (".tar", ".tar"),
    (".tgz", ".tgz"),
    (".tar.gz", ".tar.gz"),
    ("application/zip", ".zip"),
    ("application/x-gtar", ".tar"),
    ("application/x-tar", ".tar"),
];

/// Container formats the reader can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Resolves a canonical extension tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            ".zip" => Some(Self::Zip),
            ".tar" => Some(Self::Tar),
            ".tgz" | ".tar.gz" => Some(Self::TarGz),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        })
    }
}

/// Configurable MIME-type / extension to archive tag table.
///
/// # Example
///
/// ```
/// use preserver_core::archive::{ArchiveFormat, ArchiveTypes};
///
/// let types = ArchiveTypes::default();
/// assert_eq!(types.lookup("http://x/data.tar.gz", None), Some(".tar.gz"));
/// assert_eq!(types.format_of("http://x/f.bin", Some("application/zip")), Some(ArchiveFormat::Zip));
/// assert_eq!(types.lookup("http://x/page.html", Some("text/html")), None);
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveTypes {
    by_mime: HashMap<String, String>,
    by_extension: HashMap<String, String>,
    limits: ArchiveLimits,
}

impl Default for ArchiveTypes {
    fn default() -> Self {
        Self::from_table(
            DEFAULT_TABLE
                .iter()
                .map(|(key, tag)| ((*key).to_string(), (*tag).to_string())),
        )
    }
}

impl ArchiveTypes {
    /// Builds a registry from `(key, tag)` pairs. Keys starting with a dot
    /// are filename extensions, anything else is a MIME type.
    pub fn from_table(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut by_mime = HashMap::new();
        let mut by_extension = HashMap::new();
        for (key, tag) in entries {
            let key = key.trim().to_ascii_lowercase();
            if key.starts_with('.') {
                by_extension.insert(key, tag);
            } else {
                by_mime.insert(key, tag);
            }
        }
        Self {
            by_mime,
            by_extension,
            limits: ArchiveLimits::default(),
        }
    }

    /// Replaces the decompression bounds used when containers are opened.
    #[must_use]
    pub fn with_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn limits(&self) -> ArchiveLimits {
        self.limits
    }

    /// Registry that recognizes nothing, disabling archive expansion.
    #[must_use]
    pub fn none() -> Self {
        Self::from_table(std::iter::empty())
    }

    /// Returns the canonical tag for a URL or member name, consulting the
    /// MIME type first and then the longest matching extension.
    #[must_use]
    pub fn lookup(&self, url: &str, content_type: Option<&str>) -> Option<&str> {
        if let Some(content_type) = content_type {
            let mime = content_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if let Some(tag) = self.by_mime.get(&mime) {
                return Some(tag);
            }
        }

        let path = url.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
        name.match_indices('.')
            .find_map(|(pos, _)| self.by_extension.get(&name[pos..]))
            .map(String::as_str)
    }

    /// Returns the decoder for a URL or member name, if it is a container.
    #[must_use]
    pub fn format_of(&self, url: &str, content_type: Option<&str>) -> Option<ArchiveFormat> {
        let tag = self.lookup(url, content_type)?;
        let format = ArchiveFormat::from_tag(tag);
        if format.is_none() {
            debug!(url, tag, "archive tag has no decoder");
        }
        format
    }
}
