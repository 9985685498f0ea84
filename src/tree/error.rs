//! Error types for content tree addressing.
//!
//! Addressing failures are always local to a single resolve call. A
//! container that exists but lacks the requested member is reported as
//! [`TreeError::MemberNotFound`], never as the generic
//! [`TreeError::NotFound`].

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::repository::RepositoryError;

/// Errors raised while resolving or reading content tree nodes.
#[derive(Debug, Error)]
pub enum TreeError {
    /// No stored content exists for the URL.
    #[error("no content for {url}")]
    NotFound {
        /// The URL that was resolved.
        url: String,
    },

    /// The container leaf exists but does not hold the requested member.
    #[error("member {member} not found in {container}")]
    MemberNotFound {
        /// URL of the outermost container leaf.
        container: String,
        /// Member path that could not be located.
        member: String,
    },

    /// The archive-member address could not be parsed.
    #[error("malformed archive member URL {url}: {reason}")]
    MalformedMemberUrl {
        /// The offending URL.
        url: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The container is not a recognized archive type.
    #[error("{url} is not a recognized archive")]
    UnsupportedArchive {
        /// URL (or member path) of the would-be container.
        url: String,
    },

    /// The container could not be decoded.
    #[error("unreadable archive {url}: {source}")]
    Archive {
        /// URL of the container.
        url: String,
        /// The underlying decoding error.
        #[source]
        source: ArchiveError,
    },

    /// The storage layer failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Reading stored content failed.
    #[error("IO error reading {url}: {source}")]
    Io {
        /// URL of the leaf being read.
        url: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl TreeError {
    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Creates a member-not-found error.
    pub fn member_not_found(container: impl Into<String>, member: impl Into<String>) -> Self {
        Self::MemberNotFound {
            container: container.into(),
            member: member.into(),
        }
    }

    /// Creates a malformed member address error.
    pub fn malformed(url: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedMemberUrl {
            url: url.into(),
            reason,
        }
    }

    /// Creates an unsupported-archive error.
    pub fn unsupported_archive(url: impl Into<String>) -> Self {
        Self::UnsupportedArchive { url: url.into() }
    }

    /// Creates an archive decoding error.
    pub fn archive(url: impl Into<String>, source: ArchiveError) -> Self {
        Self::Archive {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            url: url.into(),
            source,
        }
    }

    /// Returns true for either flavor of "nothing there".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MemberNotFound { .. })
    }
}
