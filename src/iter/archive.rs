//! Archive-aware iteration.
//!
//! Recognized container archives are not yielded themselves; their members
//! are yielded instead, as archive-member leaves addressed
//! `container!/member`. Archives found inside archives are expanded the
//! same way, up to [`MAX_ARCHIVE_DEPTH`] levels; deeper containers are
//! yielded as ordinary members.
//!
//! Expansion uses an explicit stack of open archives rather than
//! recursion. Each open archive extracts one member at a time, bounded by
//! the unit's [`ArchiveLimits`](crate::archive::ArchiveLimits). An archive
//! that cannot be read, and a member that cannot be extracted or is too
//! large, are logged, counted as excluded and skipped.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::CuIterator;
use crate::archive::{ArchiveFormat, MemberReader};
use crate::tree::{
    CachedUrl, MAX_ARCHIVE_DEPTH, MEMBER_SEPARATOR, PROPERTY_FETCH_TIME, PROPERTY_LAST_MODIFIED,
};

/// One open archive on the work-list.
struct Frame {
    /// Address of the archive itself; members are `address!/name`.
    address: String,
    depth: usize,
    members: MemberReader,
}

/// [`CuIterator`] with container archives replaced by their members.
pub struct ArchiveMemberIterator {
    leaves: CuIterator,
    stack: Vec<Frame>,
    unchanged_after: Option<SystemTime>,
}

impl fmt::Debug for ArchiveMemberIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveMemberIterator")
            .field("leaves", &self.leaves)
            .field("open_archives", &self.stack.len())
            .field("unchanged_after", &self.unchanged_after)
            .finish()
    }
}

impl ArchiveMemberIterator {
    #[must_use]
    pub fn new(leaves: CuIterator) -> Self {
        Self {
            leaves,
            stack: Vec::new(),
            unchanged_after: None,
        }
    }

    /// Skips expanding containers whose content was fetched (or, lacking a
    /// fetch time, last modified) at or before `date`.
    #[must_use]
    pub fn with_unchanged_after(mut self, date: Option<SystemTime>) -> Self {
        self.unchanged_after = date;
        self
    }

    /// Candidates filtered out so far, including unreadable archives and
    /// members.
    #[must_use]
    pub fn excluded_count(&self) -> usize {
        self.leaves.excluded_count()
    }

    /// Pushes `leaf`'s members onto the stack. Returns false if the archive
    /// could not be read.
    fn open(&mut self, leaf: &CachedUrl, format: ArchiveFormat, depth: usize) -> bool {
        let data = match leaf.read_content() {
            Ok(data) => data,
            Err(e) => {
                warn!(url = %leaf.url(), error = %e, "skipping unreadable archive");
                return false;
            }
        };
        let limits = self.leaves.unit().tree().archive_types().limits();
        match MemberReader::open(format, data, limits) {
            Ok(members) => {
                debug!(url = %leaf.url(), %format, depth, "expanding archive");
                self.stack.push(Frame {
                    address: leaf.url().to_string(),
                    depth,
                    members,
                });
                true
            }
            Err(e) => {
                warn!(url = %leaf.url(), %format, error = %e, "skipping unreadable archive");
                false
            }
        }
    }

    fn unchanged(&self, leaf: &CachedUrl) -> bool {
        let Some(after) = self.unchanged_after else {
            return false;
        };
        let properties = leaf.properties();
        let changed_at = properties
            .get(PROPERTY_FETCH_TIME)
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| UNIX_EPOCH + std::time::Duration::from_millis(ms))
            .or_else(|| {
                properties
                    .get(PROPERTY_LAST_MODIFIED)
                    .and_then(|date| httpdate::parse_http_date(date).ok())
            });
        changed_at.is_some_and(|at| at <= after)
    }

    /// Next member of the innermost open archive, expanding nested
    /// containers as they are reached.
    fn next_member(&mut self) -> Option<CachedUrl> {
        while let Some(frame) = self.stack.last_mut() {
            let Some(member) = frame.members.next() else {
                self.stack.pop();
                continue;
            };
            let url = format!("{}{MEMBER_SEPARATOR}{}", frame.address, member.entry.name);
            let depth = frame.depth;

            if !self.leaves.spec().matches(&url) {
                self.leaves.count_excluded();
                continue;
            }
            let bytes = match member.content {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(url = %url, error = %e, "skipping unreadable archive member");
                    self.leaves.count_excluded();
                    continue;
                }
            };
            let leaf = CachedUrl::member(
                std::sync::Arc::clone(self.leaves.unit().tree()),
                url,
                &member.entry,
                bytes,
            );

            if let Some(format) = leaf.archive_format() {
                if depth + 1 < MAX_ARCHIVE_DEPTH {
                    if !self.open(&leaf, format, depth + 1) {
                        self.leaves.count_excluded();
                    }
                    continue;
                }
                debug!(url = %leaf.url(), depth, "archive nesting limit reached");
            }
            return Some(leaf);
        }
        None
    }
}

impl Iterator for ArchiveMemberIterator {
    type Item = CachedUrl;

    fn next(&mut self) -> Option<CachedUrl> {
        loop {
            if let Some(member) = self.next_member() {
                return Some(member);
            }
            let leaf = self.leaves.next()?;
            if !leaf.has_content() {
                return Some(leaf);
            }
            let Some(format) = leaf.archive_format() else {
                return Some(leaf);
            };
            if self.unchanged(&leaf) {
                debug!(url = %leaf.url(), "archive unchanged, not expanding");
                self.leaves.count_excluded();
                continue;
            }
            if !self.open(&leaf, format, 0) {
                self.leaves.count_excluded();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;

    use std::sync::Arc;

    use super::*;
    use crate::archive::{ArchiveLimits, ArchiveTypes};
    use crate::au::{ArchivalUnit, AuConfig, UnitType};
    use crate::iter::tests::unit_with;
    use crate::iter::{CuIterable, IterOptions};
    use crate::repository::{MemoryRepository, Properties, Repository};
    use crate::tree::{CachedUrlSetSpec, TreeError};

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn urls(iter: impl Iterator<Item = CachedUrl>) -> Vec<String> {
        iter.map(|leaf| leaf.url().to_string()).collect()
    }

    #[test]
    fn test_zip_replaced_by_members() {
        let zip = zip_of(&[("b.txt", b"data"), ("c.txt", b"more")]);
        let unit = unit_with(
            AuConfig::new("journal", "http://x/"),
            &[("http://x/a.zip", zip.as_slice()), ("http://x/z.html", b"z")],
        );
        let leaves: Vec<CachedUrl> = unit
            .archive_member_iterator(IterOptions::default())
            .unwrap()
            .collect();
        assert_eq!(
            urls(leaves.iter().cloned()),
            vec!["http://x/a.zip!/b.txt", "http://x/a.zip!/c.txt", "http://x/z.html"]
        );
        assert_eq!(leaves[0].read_content().unwrap(), b"data");
        assert!(leaves[0].is_archive_member());
    }

    #[test]
    fn test_nested_archive_expanded() {
        let inner = tar_of(&[("deep.txt", b"deep")]);
        let outer = zip_of(&[("inner.tar", inner.as_slice()), ("top.txt", b"top")]);
        let unit = unit_with(AuConfig::new("journal", "http://x/"), &[("http://x/a.zip", outer.as_slice())]);
        let leaves: Vec<CachedUrl> = unit
            .archive_member_iterator(IterOptions::default())
            .unwrap()
            .collect();
        assert_eq!(
            urls(leaves.iter().cloned()),
            vec!["http://x/a.zip!/inner.tar!/deep.txt", "http://x/a.zip!/top.txt"]
        );
        assert_eq!(leaves[0].read_content().unwrap(), b"deep");
    }

    #[test]
    fn test_corrupt_archive_skipped_and_counted() {
        let unit = unit_with(
            AuConfig::new("journal", "http://x/"),
            &[("http://x/bad.zip", b"not a zip"), ("http://x/ok.html", b"ok")],
        );
        let mut iter = unit.archive_member_iterator(IterOptions::default()).unwrap();
        assert_eq!(urls(iter.by_ref()), vec!["http://x/ok.html"]);
        // stem plus the unreadable archive
        assert_eq!(iter.excluded_count(), 2);
    }

    #[test]
    fn test_members_filtered_by_spec() {
        let zip = zip_of(&[("keep.txt", b"k"), ("drop.txt", b"d")]);
        let unit = unit_with(AuConfig::new("journal", "http://x/"), &[("http://x/a.zip", zip.as_slice())]);
        let spec = CachedUrlSetSpec::subtree_matching("http://x/", r"(\.zip|keep\.txt)$").unwrap();
        let iter = ArchiveMemberIterator::new(unit.subtree_iterator(spec, IterOptions::default()).unwrap());
        assert_eq!(urls(iter), vec!["http://x/a.zip!/keep.txt"]);
    }

    #[test]
    fn test_unchanged_archive_not_expanded() {
        let zip = zip_of(&[("b.txt", b"data")]);
        let unit = unit_with(AuConfig::new("journal", "http://x/"), &[]);
        let mut props = Properties::new();
        props.insert(PROPERTY_FETCH_TIME.to_string(), "1000".to_string());
        unit.tree()
            .repository()
            .commit("http://x/old.zip", &zip, &props)
            .unwrap();
        props.insert(PROPERTY_FETCH_TIME.to_string(), "5000".to_string());
        unit.tree()
            .repository()
            .commit("http://x/new.zip", &zip, &props)
            .unwrap();

        let cutoff = UNIX_EPOCH + std::time::Duration::from_millis(2000);
        let iter = unit
            .archive_member_iterator(IterOptions::default())
            .unwrap()
            .with_unchanged_after(Some(cutoff));
        assert_eq!(urls(iter), vec!["http://x/new.zip!/b.txt"]);
    }

    #[test]
    fn test_oversized_member_skipped_and_counted() {
        let zeros = vec![0u8; 1 << 20];
        let zip = zip_of(&[("huge.bin", zeros.as_slice()), ("small.txt", b"ok")]);
        let repo = MemoryRepository::new();
        repo.commit("http://x/bomb.zip", &zip, &Properties::new()).unwrap();
        let types = ArchiveTypes::default().with_limits(ArchiveLimits {
            max_member_bytes: 4096,
            max_expanded_bytes: 1 << 30,
        });
        let unit = Arc::new(
            ArchivalUnit::new(
                AuConfig::new("journal", "http://x/"),
                Arc::new(UnitType::new("journal")),
                Arc::new(repo),
                Arc::new(types),
            )
            .unwrap(),
        );

        let mut iter = unit.archive_member_iterator(IterOptions::default()).unwrap();
        assert_eq!(urls(iter.by_ref()), vec!["http://x/bomb.zip!/small.txt"]);
        // stem plus the oversized member
        assert_eq!(iter.excluded_count(), 2);

        let err = unit.tree().resolve_leaf("http://x/bomb.zip!/huge.bin").unwrap_err();
        assert!(matches!(err, TreeError::Archive { ref source, .. } if source.is_too_large()));
    }
}
