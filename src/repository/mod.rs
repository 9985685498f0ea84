//! Storage collaborator for the content tree.
//!
//! The tree defines addressing and policy; a [`Repository`] persists bytes.
//! Every commit creates a new version of a URL and publishes it atomically:
//! readers either see the previous version or the complete new one.
//!
//! Two implementations are provided: [`MemoryRepository`] for tests and
//! one-shot runs, and [`FsRepository`] which writes each version to a
//! temporary file and renames it into place.

mod fs;
mod memory;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;

pub use fs::FsRepository;
pub use memory::MemoryRepository;

/// Lower-cased header names to values, plus bookkeeping properties.
pub type Properties = BTreeMap<String, String>;

/// Metadata of one published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Monotonic version number, starting at 1.
    pub version: u32,
    /// Content size in bytes.
    pub size: u64,
    /// Header properties recorded with the content.
    pub properties: Properties,
}

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Filesystem failure.
    #[error("repository IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A properties file could not be parsed.
    #[error("corrupt properties at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The requested version does not exist.
    #[error("no version {version} of {url}")]
    NoSuchVersion { url: String, version: u32 },
}

impl RepositoryError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-properties error.
    pub fn corrupt(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.into(),
            source,
        }
    }

    /// Creates a missing-version error.
    pub fn no_such_version(url: impl Into<String>, version: u32) -> Self {
        Self::NoSuchVersion {
            url: url.into(),
            version,
        }
    }
}

/// Versioned per-unit content store.
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Every URL with at least one published version, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store cannot be listed.
    fn list_urls(&self) -> Result<Vec<String>, RepositoryError>;

    /// Latest published version of `url`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store cannot be read.
    fn current_version(&self, url: &str) -> Result<Option<VersionInfo>, RepositoryError>;

    /// Opens the content of a specific version.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NoSuchVersion`] for an unknown version.
    fn open(&self, url: &str, version: u32) -> Result<Box<dyn Read + Send>, RepositoryError>;

    /// Stores a new version and publishes it atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the content cannot be persisted; no
    /// partial version is ever visible in that case.
    fn commit(
        &self,
        url: &str,
        content: &[u8],
        properties: &Properties,
    ) -> Result<VersionInfo, RepositoryError>;
}
