//! Member listing and extraction for in-memory containers.
//!
//! [`MemberReader`] extracts one member per call to `next`. Zip members are
//! inflated on demand. A tar is indexed once (headers only) and members are
//! copied out of the stored bytes; a gzipped tar is first inflated into
//! memory. Every inflation is bounded by [`ArchiveLimits`].

use std::fmt;
use std::io::{Cursor, Read};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, warn};

use super::ArchiveFormat;

/// Largest single member extracted by default (256 MiB).
pub const DEFAULT_MAX_MEMBER_BYTES: u64 = 256 * 1024 * 1024;

/// Default cap on the bytes inflated from one container (1 GiB).
pub const DEFAULT_MAX_EXPANDED_BYTES: u64 = 1024 * 1024 * 1024;

/// Errors decoding a container.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The zip central directory or an entry is corrupt.
    #[error("corrupt zip archive: {source}")]
    Zip {
        #[source]
        source: zip::result::ZipError,
    },

    /// Reading a tar stream (or its gzip wrapper) failed.
    #[error("IO error reading {format} archive: {source}")]
    Io {
        format: ArchiveFormat,
        #[source]
        source: std::io::Error,
    },

    /// Inflating `name` would exceed `limit` bytes.
    #[error("{name} expands beyond {limit} bytes")]
    TooLarge { name: String, limit: u64 },
}

impl ArchiveError {
    fn zip(source: zip::result::ZipError) -> Self {
        Self::Zip { source }
    }

    fn io(format: ArchiveFormat, source: std::io::Error) -> Self {
        Self::Io { format, source }
    }

    fn too_large(name: &str, limit: u64) -> Self {
        Self::TooLarge {
            name: name.to_string(),
            limit,
        }
    }

    /// True when a size limit stopped extraction.
    #[must_use]
    pub fn is_too_large(&self) -> bool {
        matches!(self, Self::TooLarge { .. })
    }
}

/// Bounds on decompression while reading a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Largest member that is extracted.
    pub max_member_bytes: u64,
    /// Bytes inflated from one container: zip members plus the tar stream
    /// inside a gzipped tar.
    pub max_expanded_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_member_bytes: DEFAULT_MAX_MEMBER_BYTES,
            max_expanded_bytes: DEFAULT_MAX_EXPANDED_BYTES,
        }
    }
}

/// Metadata of one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the member inside the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Modification time recorded in the archive, when available.
    pub modified: Option<SystemTime>,
}

/// A member with its extracted bytes, or the error extracting them.
#[derive(Debug)]
pub struct ArchiveMember {
    pub entry: ArchiveEntry,
    pub content: Result<Vec<u8>, ArchiveError>,
}

/// Location of a regular file inside an uncompressed tar stream.
#[derive(Debug)]
struct TarSlot {
    entry: ArchiveEntry,
    start: usize,
    end: usize,
}

enum Source {
    Zip {
        archive: zip::ZipArchive<Cursor<Vec<u8>>>,
        next: usize,
    },
    Tar {
        data: Vec<u8>,
        slots: std::vec::IntoIter<TarSlot>,
    },
    Done,
}

/// Lazy iterator over the regular-file members of one container.
///
/// A member that fails to extract is yielded with an error and does not
/// prevent the remaining members from being read. Once the container's
/// inflation budget is spent the iterator yields that error and stops.
pub struct MemberReader {
    format: ArchiveFormat,
    source: Source,
    limits: ArchiveLimits,
    expanded: u64,
}

impl fmt::Debug for MemberReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberReader")
            .field("format", &self.format)
            .field("limits", &self.limits)
            .field("expanded", &self.expanded)
            .finish_non_exhaustive()
    }
}

impl MemberReader {
    /// Opens `data` as a container of `format`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the archive itself cannot be opened, or
    /// when a gzipped tar inflates beyond `limits.max_expanded_bytes`.
    pub fn open(format: ArchiveFormat, data: Vec<u8>, limits: ArchiveLimits) -> Result<Self, ArchiveError> {
        let (source, expanded) = match format {
            ArchiveFormat::Zip => {
                let archive = zip::ZipArchive::new(Cursor::new(data)).map_err(ArchiveError::zip)?;
                (Source::Zip { archive, next: 0 }, 0)
            }
            ArchiveFormat::Tar => {
                let slots = index_tar(format, &data)?;
                (
                    Source::Tar {
                        data,
                        slots: slots.into_iter(),
                    },
                    0,
                )
            }
            ArchiveFormat::TarGz => {
                let data = inflate_gzip(&data, limits.max_expanded_bytes)?;
                let slots = index_tar(format, &data)?;
                let expanded = data.len() as u64;
                (
                    Source::Tar {
                        data,
                        slots: slots.into_iter(),
                    },
                    expanded,
                )
            }
        };
        Ok(Self {
            format,
            source,
            limits,
            expanded,
        })
    }

    fn next_zip_member(&mut self) -> Option<ArchiveMember> {
        let Source::Zip { archive, next } = &mut self.source else {
            return None;
        };
        while *next < archive.len() {
            let index = *next;
            *next += 1;
            let file = match archive.by_index(index) {
                Ok(file) => file,
                Err(e) => {
                    warn!(index, error = %e, "skipping unreadable zip entry");
                    continue;
                }
            };
            if file.is_dir() {
                continue;
            }
            let entry = ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
                modified: None,
            };
            let budget = self.limits.max_expanded_bytes.saturating_sub(self.expanded);
            let limit = self.limits.max_member_bytes.min(budget);
            let content = read_capped(file, &entry.name, limit, self.format);
            match &content {
                Ok(bytes) => self.expanded += bytes.len() as u64,
                Err(e) if e.is_too_large() && budget <= self.limits.max_member_bytes => {
                    debug!(member = %entry.name, expanded = self.expanded, "container expansion budget spent");
                    self.source = Source::Done;
                }
                Err(_) => {}
            }
            return Some(ArchiveMember { entry, content });
        }
        None
    }

    fn next_tar_member(&mut self) -> Option<ArchiveMember> {
        let Source::Tar { data, slots } = &mut self.source else {
            return None;
        };
        let slot = slots.next()?;
        let content = if slot.entry.size > self.limits.max_member_bytes {
            Err(ArchiveError::too_large(&slot.entry.name, self.limits.max_member_bytes))
        } else {
            Ok(data[slot.start..slot.end].to_vec())
        };
        Some(ArchiveMember {
            entry: slot.entry,
            content,
        })
    }
}

impl Iterator for MemberReader {
    type Item = ArchiveMember;

    fn next(&mut self) -> Option<ArchiveMember> {
        match self.source {
            Source::Zip { .. } => self.next_zip_member(),
            Source::Tar { .. } => self.next_tar_member(),
            Source::Done => None,
        }
    }
}

/// Extracts a single member by path.
///
/// Returns `Ok(None)` if the archive is readable but has no such member.
///
/// # Errors
///
/// Returns [`ArchiveError`] when the archive or the member is unreadable,
/// or when extracting it would exceed `limits`.
pub fn read_member(
    format: ArchiveFormat,
    data: &[u8],
    name: &str,
    limits: ArchiveLimits,
) -> Result<Option<(ArchiveEntry, Vec<u8>)>, ArchiveError> {
    match format {
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(ArchiveError::zip)?;
            let file = match archive.by_name(name) {
                Ok(file) => file,
                Err(zip::result::ZipError::FileNotFound) => return Ok(None),
                Err(e) => return Err(ArchiveError::zip(e)),
            };
            if file.is_dir() {
                return Ok(None);
            }
            let entry = ArchiveEntry {
                name: name.to_string(),
                size: file.size(),
                modified: None,
            };
            let limit = limits.max_member_bytes.min(limits.max_expanded_bytes);
            let bytes = read_capped(file, name, limit, format)?;
            Ok(Some((entry, bytes)))
        }
        ArchiveFormat::Tar => tar_member(format, data, name, limits),
        ArchiveFormat::TarGz => {
            let stream = inflate_gzip(data, limits.max_expanded_bytes)?;
            tar_member(format, &stream, name, limits)
        }
    }
}

fn tar_member(
    format: ArchiveFormat,
    data: &[u8],
    name: &str,
    limits: ArchiveLimits,
) -> Result<Option<(ArchiveEntry, Vec<u8>)>, ArchiveError> {
    let Some(slot) = index_tar(format, data)?
        .into_iter()
        .find(|slot| slot.entry.name == name)
    else {
        return Ok(None);
    };
    if slot.entry.size > limits.max_member_bytes {
        return Err(ArchiveError::too_large(name, limits.max_member_bytes));
    }
    let bytes = data[slot.start..slot.end].to_vec();
    Ok(Some((slot.entry, bytes)))
}

/// Reads at most `limit` bytes, failing if the reader has more.
fn read_capped<R: Read>(reader: R, name: &str, limit: u64, format: ArchiveFormat) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| ArchiveError::io(format, e))?;
    if buf.len() as u64 > limit {
        return Err(ArchiveError::too_large(name, limit));
    }
    Ok(buf)
}

fn inflate_gzip(data: &[u8], limit: u64) -> Result<Vec<u8>, ArchiveError> {
    read_capped(GzDecoder::new(data), "gzip stream", limit, ArchiveFormat::TarGz)
}

/// Lists the regular files of an uncompressed tar stream without copying
/// their data.
fn index_tar(format: ArchiveFormat, data: &[u8]) -> Result<Vec<TarSlot>, ArchiveError> {
    let mut archive = tar::Archive::new(data);
    let entries = archive.entries().map_err(|e| ArchiveError::io(format, e))?;
    let mut slots = Vec::new();
    for entry in entries {
        // A broken header leaves the stream position unknown, so stop here
        // and keep what was read so far.
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if slots.is_empty() {
                    return Err(ArchiveError::io(format, e));
                }
                warn!(%format, error = %e, "truncated tar listing");
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = match entry.path() {
            Ok(path) => path.to_string_lossy().trim_start_matches("./").to_string(),
            Err(e) => {
                warn!(%format, error = %e, "skipping tar entry with invalid path");
                continue;
            }
        };
        let start = usize::try_from(entry.raw_file_position()).unwrap_or(usize::MAX);
        let end = usize::try_from(entry.size())
            .ok()
            .and_then(|size| start.checked_add(size))
            .filter(|end| *end <= data.len());
        let Some(end) = end else {
            warn!(%format, member = %name, "tar member runs past end of archive");
            break;
        };
        let modified = entry
            .header()
            .mtime()
            .ok()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        slots.push(TarSlot {
            entry: ArchiveEntry {
                name,
                size: entry.size(),
                modified,
            },
            start,
            end,
        });
    }
    Ok(slots)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn limits(member: u64, expanded: u64) -> ArchiveLimits {
        ArchiveLimits {
            max_member_bytes: member,
            max_expanded_bytes: expanded,
        }
    }

    #[test]
    fn test_zip_members_listed_in_order() {
        let data = zip_bytes(&[("a.txt", b"one"), ("dir/b.txt", b"two")]);
        let members: Vec<_> = MemberReader::open(ArchiveFormat::Zip, data, ArchiveLimits::default())
            .unwrap()
            .collect();
        let names: Vec<_> = members.iter().map(|m| m.entry.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "dir/b.txt"]);
        assert_eq!(members[1].content.as_ref().unwrap(), b"two");
    }

    #[test]
    fn test_zip_read_member_missing_is_none() {
        let data = zip_bytes(&[("a.txt", b"one")]);
        let limits = ArchiveLimits::default();
        assert!(read_member(ArchiveFormat::Zip, &data, "nope.txt", limits).unwrap().is_none());
        let (entry, bytes) = read_member(ArchiveFormat::Zip, &data, "a.txt", limits).unwrap().unwrap();
        assert_eq!(entry.size, 3);
        assert_eq!(bytes, b"one");
    }

    #[test]
    fn test_tar_members_carry_mtime() {
        let data = tar_bytes(&[("x/y.txt", b"payload"), ("z.txt", b"zz")]);
        let members: Vec<_> = MemberReader::open(ArchiveFormat::Tar, data, ArchiveLimits::default())
            .unwrap()
            .collect();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].entry.name, "x/y.txt");
        assert_eq!(members[0].content.as_ref().unwrap(), b"payload");
        assert_eq!(members[1].content.as_ref().unwrap(), b"zz");
        assert_eq!(
            members[0].entry.modified,
            Some(UNIX_EPOCH + Duration::from_secs(1_600_000_000))
        );
    }

    #[test]
    fn test_tgz_read_member() {
        let data = gzip(&tar_bytes(&[("m.txt", b"gz content")]));
        let (_, bytes) = read_member(ArchiveFormat::TarGz, &data, "m.txt", ArchiveLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"gz content");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(MemberReader::open(ArchiveFormat::Zip, b"not a zip".to_vec(), ArchiveLimits::default()).is_err());
    }

    #[test]
    fn test_oversized_zip_member_rejected_and_rest_still_read() {
        let big = vec![0u8; 64 * 1024];
        let data = zip_bytes(&[("big.bin", big.as_slice()), ("small.txt", b"ok")]);
        let members: Vec<_> = MemberReader::open(ArchiveFormat::Zip, data, limits(1024, 1 << 20))
            .unwrap()
            .collect();
        assert_eq!(members.len(), 2);
        assert!(members[0].content.as_ref().unwrap_err().is_too_large());
        assert_eq!(members[1].content.as_ref().unwrap(), b"ok");

        let data = zip_bytes(&[("big.bin", big.as_slice())]);
        let err = read_member(ArchiveFormat::Zip, &data, "big.bin", limits(1024, 1 << 20)).unwrap_err();
        assert!(err.is_too_large());
    }

    #[test]
    fn test_zip_expansion_budget_stops_reader() {
        let chunk = vec![7u8; 600];
        let data = zip_bytes(&[
            ("a.bin", chunk.as_slice()),
            ("b.bin", chunk.as_slice()),
            ("c.bin", chunk.as_slice()),
        ]);
        let members: Vec<_> = MemberReader::open(ArchiveFormat::Zip, data, limits(1000, 1000))
            .unwrap()
            .collect();
        // a fits, b overruns the container budget, c is never inflated
        assert_eq!(members.len(), 2);
        assert!(members[0].content.is_ok());
        assert!(members[1].content.as_ref().unwrap_err().is_too_large());
    }

    #[test]
    fn test_oversized_tar_member_rejected() {
        let big = vec![1u8; 4096];
        let data = tar_bytes(&[("big.bin", big.as_slice()), ("small.txt", b"ok")]);
        let members: Vec<_> = MemberReader::open(ArchiveFormat::Tar, data, limits(1024, 1 << 20))
            .unwrap()
            .collect();
        assert!(members[0].content.as_ref().unwrap_err().is_too_large());
        assert_eq!(members[1].content.as_ref().unwrap(), b"ok");
    }

    #[test]
    fn test_gzip_bomb_refused_on_open() {
        let zeros = vec![0u8; 256 * 1024];
        let data = gzip(&tar_bytes(&[("zeros.bin", zeros.as_slice())]));
        assert!(data.len() < 4096);
        let err = MemberReader::open(ArchiveFormat::TarGz, data.clone(), limits(1 << 20, 64 * 1024)).unwrap_err();
        assert!(err.is_too_large());
        let err = read_member(ArchiveFormat::TarGz, &data, "zeros.bin", limits(1 << 20, 64 * 1024)).unwrap_err();
        assert!(err.is_too_large());
    }
}
