//! Archive member addressing.
//!
//! An entry inside a container archive is addressed as
//! `<containerUrl>!/<memberPath>`. The member path may itself contain the
//! separator, naming an archive nested inside another archive.

use std::fmt;

use super::error::TreeError;

/// Reserved separator between a container URL and a member path.
pub const MEMBER_SEPARATOR: &str = "!/";

/// Maximum number of archive levels a member address may traverse.
pub const MAX_ARCHIVE_DEPTH: usize = 8;

/// Parsed `<containerUrl>!/<memberPath>` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveMemberSpec {
    container_url: String,
    member: String,
}

impl ArchiveMemberSpec {
    /// Builds an address from its parts.
    #[must_use]
    pub fn new(container_url: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            container_url: container_url.into(),
            member: member.into(),
        }
    }

    /// Parses `url`, splitting at the first separator.
    ///
    /// Returns `Ok(None)` for an ordinary URL.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::MalformedMemberUrl`] when the container or the
    /// member path is empty, or the address nests deeper than
    /// [`MAX_ARCHIVE_DEPTH`].
    pub fn from_url(url: &str) -> Result<Option<Self>, TreeError> {
        let Some((container, member)) = url.split_once(MEMBER_SEPARATOR) else {
            return Ok(None);
        };
        if container.is_empty() {
            return Err(TreeError::malformed(url, "empty container URL"));
        }
        let spec = Self::new(container, member);
        if spec.path_segments().any(str::is_empty) {
            return Err(TreeError::malformed(url, "empty member path"));
        }
        if spec.depth() > MAX_ARCHIVE_DEPTH {
            return Err(TreeError::malformed(url, "archive nesting too deep"));
        }
        Ok(Some(spec))
    }

    /// True if `url` uses member addressing at all.
    #[must_use]
    pub fn is_member_url(url: &str) -> bool {
        url.contains(MEMBER_SEPARATOR)
    }

    /// URL of the outermost container.
    #[must_use]
    pub fn container_url(&self) -> &str {
        &self.container_url
    }

    /// Full member path below the outermost container.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Member path split into one segment per archive level.
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.member.split(MEMBER_SEPARATOR)
    }

    /// Number of archive levels traversed.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path_segments().count()
    }

    /// Address of `member` inside the archive this spec points at.
    #[must_use]
    pub fn nested(&self, member: &str) -> Self {
        Self::new(
            self.container_url.clone(),
            format!("{}{MEMBER_SEPARATOR}{member}", self.member),
        )
    }

    /// Text form of the address.
    #[must_use]
    pub fn to_url(&self) -> String {
        format!("{}{MEMBER_SEPARATOR}{}", self.container_url, self.member)
    }
}

impl fmt::Display for ArchiveMemberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_plain_url_is_none() {
        assert!(ArchiveMemberSpec::from_url("http://x/a.zip").unwrap().is_none());
    }

    #[test]
    fn test_from_url_splits_at_first_separator() {
        let spec = ArchiveMemberSpec::from_url("http://x/a.tgz!/b/c.zip!/d.txt")
            .unwrap()
            .unwrap();
        assert_eq!(spec.container_url(), "http://x/a.tgz");
        assert_eq!(spec.member(), "b/c.zip!/d.txt");
        assert_eq!(spec.path_segments().collect::<Vec<_>>(), vec!["b/c.zip", "d.txt"]);
        assert_eq!(spec.depth(), 2);
        assert_eq!(spec.to_url(), "http://x/a.tgz!/b/c.zip!/d.txt");
    }

    #[test]
    fn test_from_url_rejects_empty_member() {
        let err = ArchiveMemberSpec::from_url("http://x/a.zip!/").unwrap_err();
        assert!(matches!(err, TreeError::MalformedMemberUrl { .. }));
    }

    #[test]
    fn test_nested_appends_level() {
        let spec = ArchiveMemberSpec::new("http://x/a.zip", "inner.zip");
        assert_eq!(spec.nested("b.txt").to_url(), "http://x/a.zip!/inner.zip!/b.txt");
    }
}
