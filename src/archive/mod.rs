//! Container archive support.
//!
//! [`ArchiveTypes`] decides whether a leaf is a recognized container and
//! carries the [`ArchiveLimits`] applied when one is opened. The reader
//! lists and extracts members of zip, tar and gzipped tar archives held in
//! memory.

mod reader;
mod types;

pub use reader::{
    ArchiveEntry, ArchiveError, ArchiveLimits, ArchiveMember, DEFAULT_MAX_EXPANDED_BYTES,
    DEFAULT_MAX_MEMBER_BYTES, MemberReader, read_member,
};
pub use types::{ArchiveFormat, ArchiveTypes};
