use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{Properties, Repository, RepositoryError, VersionInfo};

const URL_FILE: &str = "url";
const DATA_EXT: &str = "data";
const PROPS_EXT: &str = "json";
const TMP_EXT: &str = "tmp";

#[derive(Debug, Serialize, Deserialize)]
struct VersionStamp {
    size: u64,
    properties: Properties,
}

/// Repository storing one directory per URL under a root directory.
///
/// Layout: `<root>/<sha256(url)>/url` holds the URL, and each version `n`
/// is a `<n>.data` file plus a `<n>.json` properties file. Both are written
/// to a temporary name and renamed into place; the properties file is
/// renamed last, and its presence is what publishes the version.
#[derive(Debug)]
pub struct FsRepository {
    root: PathBuf,
    // Per-URL commit locks so concurrent commits of one URL cannot
    // allocate the same version number. An entry lives only while a commit
    // of that URL is in progress.
    commit_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FsRepository {
    /// Opens (creating if needed) a repository rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| RepositoryError::io(&root, e))?;
        Ok(Self {
            root,
            commit_locks: DashMap::new(),
        })
    }

    /// Opens the sub-repository of one unit below a shared root.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Io`] if the directory cannot be created.
    pub fn for_unit(root: &Path, au_id: &str) -> Result<Self, RepositoryError> {
        Self::open(root.join(&hex_digest(au_id)[..24]))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_dir(&self, url: &str) -> PathBuf {
        self.root.join(hex_digest(url))
    }

    fn published_versions(dir: &Path) -> Result<Vec<u32>, RepositoryError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::io(dir, e)),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROPS_EXT) {
                continue;
            }
            if let Some(version) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u32>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn read_stamp(dir: &Path, version: u32) -> Result<VersionInfo, RepositoryError> {
        let path = dir.join(format!("{version}.{PROPS_EXT}"));
        let text = fs::read_to_string(&path).map_err(|e| RepositoryError::io(&path, e))?;
        let stamp: VersionStamp =
            serde_json::from_str(&text).map_err(|e| RepositoryError::corrupt(&path, e))?;
        Ok(VersionInfo {
            version,
            size: stamp.size,
            properties: stamp.properties,
        })
    }
}

impl Repository for FsRepository {
    fn list_urls(&self) -> Result<Vec<String>, RepositoryError> {
        let entries = fs::read_dir(&self.root).map_err(|e| RepositoryError::io(&self.root, e))?;
        let mut urls = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::io(&self.root, e))?;
            let dir = entry.path();
            if !dir.is_dir() || Self::published_versions(&dir)?.is_empty() {
                continue;
            }
            match fs::read_to_string(dir.join(URL_FILE)) {
                Ok(url) => urls.push(url),
                Err(e) => warn!(dir = %dir.display(), error = %e, "node directory without url file"),
            }
        }
        Ok(urls)
    }

    fn current_version(&self, url: &str) -> Result<Option<VersionInfo>, RepositoryError> {
        let dir = self.node_dir(url);
        match Self::published_versions(&dir)?.last() {
            Some(&version) => Self::read_stamp(&dir, version).map(Some),
            None => Ok(None),
        }
    }

    fn open(&self, url: &str, version: u32) -> Result<Box<dyn Read + Send>, RepositoryError> {
        let dir = self.node_dir(url);
        if !dir.join(format!("{version}.{PROPS_EXT}")).exists() {
            return Err(RepositoryError::no_such_version(url, version));
        }
        let path = dir.join(format!("{version}.{DATA_EXT}"));
        let file = fs::File::open(&path).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(Box::new(file))
    }

    fn commit(
        &self,
        url: &str,
        content: &[u8],
        properties: &Properties,
    ) -> Result<VersionInfo, RepositoryError> {
        let lock = self
            .commit_locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.commit_version(url, content, properties)
        };
        drop(lock);
        // the map's own reference is the last one once no commit is waiting
        self.commit_locks
            .remove_if(url, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

impl FsRepository {
    fn commit_version(
        &self,
        url: &str,
        content: &[u8],
        properties: &Properties,
    ) -> Result<VersionInfo, RepositoryError> {
        let dir = self.node_dir(url);
        fs::create_dir_all(&dir).map_err(|e| RepositoryError::io(&dir, e))?;
        let url_path = dir.join(URL_FILE);
        if !url_path.exists() {
            write_atomically(&url_path, url.as_bytes())?;
        }

        let version = Self::published_versions(&dir)?.last().map_or(1, |v| v + 1);
        let stamp = VersionStamp {
            size: content.len() as u64,
            properties: properties.clone(),
        };
        let stamp_json =
            serde_json::to_vec_pretty(&stamp).map_err(|e| RepositoryError::corrupt(&dir, e))?;

        write_atomically(&dir.join(format!("{version}.{DATA_EXT}")), content)?;
        write_atomically(&dir.join(format!("{version}.{PROPS_EXT}")), &stamp_json)?;
        debug!(url, version, bytes = content.len(), "committed version");

        Ok(VersionInfo {
            version,
            size: stamp.size,
            properties: stamp.properties,
        })
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
    let tmp = path.with_extension(TMP_EXT);
    fs::write(&tmp, bytes).map_err(|e| RepositoryError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RepositoryError::io(path, e))
}

fn hex_digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
