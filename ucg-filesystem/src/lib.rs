//! File identity for multithreaded directory walks.
//!
//! The central type is [`FileID`], a cheap to copy handle to a single entry in a directory
//! tree. Entries are named relative to an already open parent directory, so resolving a
//! child never re-walks the full path, and metadata is fetched lazily, at most once per
//! handle, no matter how many threads ask for it.

pub mod descriptor;
mod error;
pub mod file_id;
pub mod platform;


pub use descriptor::{DescriptorRef, FileDescriptor};
pub use error::Error;
pub use file_id::FileID;

/// Classification of a filesystem entry.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Not yet classified.
    #[default]
    Uninitialized,
    /// Classified, but not something we scan, e.g. a fifo, socket, or device.
    Unknown,
    RegularFile,
    Directory,
    Symlink,
    /// Classification failed and will not be retried by this handle.
    StatFailed,
}

impl FileType {
    /// Returns `true` if this type still needs a `stat` to become definite.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, FileType::Uninitialized)
    }
}

/// Identity of a file that is independent of the path used to reach it.
///
/// Two entries with equal identifiers are the same underlying file, e.g. a hardlink and its
/// original, or two symlinks that resolve to the same target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueFileIdentifier {
    dev: u64,
    inode: u64,
}

impl UniqueFileIdentifier {
    /// Reported for entries whose identity could not be determined.
    pub const INVALID: UniqueFileIdentifier = UniqueFileIdentifier { dev: 0, inode: 0 };

    pub const fn new(dev: u64, inode: u64) -> Self {
        UniqueFileIdentifier { dev, inode }
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn is_valid(&self) -> bool {
        *self != UniqueFileIdentifier::INVALID
    }
}

impl std::fmt::Display for UniqueFileIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.inode)
    }
}

/// Metadata returned by the `stat` family of functions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Kind of object, derived from the mode bits.
    pub kind: FileType,
    /// Size of the file in bytes.
    pub size: u64,
    /// Preferred block size for I/O on this file.
    pub block_size: u64,
    /// Number of 512 byte blocks allocated.
    pub blocks: u64,
    /// Device containing the file.
    pub dev: u64,
    /// Inode number of the file.
    pub inode: u64,
    /// File mode/permissions.
    pub mode: u32,
}

impl FileStat {
    pub fn unique_file_identifier(&self) -> UniqueFileIdentifier {
        UniqueFileIdentifier::new(self.dev, self.inode)
    }
}

/// A raw record returned from listing a directory.
///
/// This is what a directory walker hands to [`FileID::from_dir_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name of the entry within its directory.
    pub name: String,
    /// Inode number reported by the directory listing.
    pub inode: u64,
    /// Kind reported by the directory listing, [`FileType::Uninitialized`] if the
    /// filesystem didn't tell us.
    pub kind: FileType,
    /// Full metadata, if the listing also issued a `stat`.
    pub stat: Option<FileStat>,
}
