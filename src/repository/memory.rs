use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, RwLock};

use super::{Properties, Repository, RepositoryError, VersionInfo};

#[derive(Debug)]
struct StoredVersion {
    info: VersionInfo,
    content: Arc<[u8]>,
}

/// Repository held entirely in memory.
///
/// Versions are appended under a write lock, so a reader holding an older
/// version keeps reading it unchanged.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    nodes: RwLock<HashMap<String, Vec<StoredVersion>>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn list_urls(&self) -> Result<Vec<String>, RepositoryError> {
        let nodes = self.nodes.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(nodes.keys().cloned().collect())
    }

    fn current_version(&self, url: &str) -> Result<Option<VersionInfo>, RepositoryError> {
        let nodes = self.nodes.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(nodes
            .get(url)
            .and_then(|versions| versions.last())
            .map(|stored| stored.info.clone()))
    }

    fn open(&self, url: &str, version: u32) -> Result<Box<dyn Read + Send>, RepositoryError> {
        let nodes = self.nodes.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let stored = nodes
            .get(url)
            .and_then(|versions| versions.iter().find(|v| v.info.version == version))
            .ok_or_else(|| RepositoryError::no_such_version(url, version))?;
        Ok(Box::new(Cursor::new(Arc::clone(&stored.content))))
    }

    fn commit(
        &self,
        url: &str,
        content: &[u8],
        properties: &Properties,
    ) -> Result<VersionInfo, RepositoryError> {
        let mut nodes = self.nodes.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let versions = nodes.entry(url.to_string()).or_default();
        let info = VersionInfo {
            version: versions.last().map_or(1, |v| v.info.version + 1),
            size: content.len() as u64,
            properties: properties.clone(),
        };
        versions.push(StoredVersion {
            info: info.clone(),
            content: Arc::from(content),
        });
        Ok(info)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_creates_new_versions() {
        let repo = MemoryRepository::new();
        let first = repo.commit("http://x/a", b"one", &Properties::new()).unwrap();
        let second = repo.commit("http://x/a", b"two", &Properties::new()).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(repo.current_version("http://x/a").unwrap().unwrap().version, 2);

        let mut old = String::new();
        repo.open("http://x/a", 1).unwrap().read_to_string(&mut old).unwrap();
        assert_eq!(old, "one");
    }

    #[test]
    fn test_open_unknown_version_fails() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.open("http://x/a", 1),
            Err(RepositoryError::NoSuchVersion { .. })
        ));
    }
}
