//! Module that defines [`FileID`], a thread-safe handle to an entry in a directory tree.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::{DescriptorRef, FileDescriptor};
use crate::{DirectoryEntry, FileStat, FileType, UniqueFileIdentifier};

mod unsync;

use unsync::{EntryName, UnsynchronizedFileID};

/// A handle to one entry discovered while walking a directory tree.
///
/// An entry is named relative to its parent directory, `at_dir`, which is itself a
/// [`FileID`]. Opening or `stat`-ing an entry resolves its name against the parent's already
/// open directory handle, never against a concatenated path, so we skip re-walking the path
/// and don't race with the directory changing underneath us.
///
/// Metadata is loaded lazily and cached forever, including failures. Every accessor can be
/// called concurrently from many threads, the first caller to need a value issues the
/// syscall while the rest wait and then read the cached result. The name of an entry never
/// changes, so [`FileID::basename`], [`FileID::at_dir`], and friends never wait. Copies made
/// with [`Clone`] have their own cache and their own descriptor, but share the parent.
///
/// A [`FileID`] can be empty, see [`FileID::is_empty`].
#[derive(Clone, Default)]
pub struct FileID {
    /// `None` for an empty handle.
    entry: Option<Entry>,
}

struct Entry {
    name: EntryName,
    cache: RwLock<UnsynchronizedFileID>,
}

impl Clone for Entry {
    /// Copies the cached state while holding a read lock on `self`.
    ///
    /// The copy shares the parent directory but never the open descriptor.
    fn clone(&self) -> Self {
        Entry {
            name: self.name.clone(),
            cache: RwLock::new(self.cache.read().clone()),
        }
    }
}

impl FileID {
    /// The current working directory, the root of all relative resolution.
    ///
    /// No syscalls are issued to create or open it.
    pub fn cwd() -> Self {
        FileID::from_parts(EntryName::cwd(), UnsynchronizedFileID::cwd())
    }

    /// An entry named `basename` within the directory `at_dir`.
    ///
    /// If the caller already has stat info for the entry, e.g. from listing the directory,
    /// providing it here skips the lazy `stat`. `at_dir` is expected to be a directory, but
    /// that's not checked until we resolve something relative to it.
    pub fn from_relative_path(
        at_dir: Arc<FileID>,
        basename: impl Into<Arc<str>>,
        stat: Option<&FileStat>,
        file_type: FileType,
    ) -> Self {
        let name = EntryName::relative(at_dir, basename.into());
        let cache = UnsynchronizedFileID::new(file_type);
        let cache = match stat {
            Some(stat) => cache.with_stat_info(stat),
            None => cache,
        };
        FileID::from_parts(name, cache)
    }

    /// An entry named by the full path `pathname`.
    ///
    /// The path is reported as-is, `at_dir` is only used as a handle to resolve against.
    pub fn from_absolute_path(
        at_dir: Option<Arc<FileID>>,
        pathname: impl Into<Arc<str>>,
        file_type: FileType,
    ) -> Self {
        let pathname = pathname.into();
        let cache = UnsynchronizedFileID::new(file_type).with_path(Arc::clone(&pathname));
        FileID::from_parts(EntryName::absolute(at_dir, pathname), cache)
    }

    /// An entry for `pathname`, which is absolute if it starts with `/` and relative to
    /// `at_dir` otherwise, e.g. a filename provided on the command line.
    pub fn new(at_dir: Arc<FileID>, pathname: impl Into<Arc<str>>) -> Self {
        let pathname = pathname.into();
        if pathname.starts_with('/') {
            FileID::from_absolute_path(Some(at_dir), pathname, FileType::Uninitialized)
        } else {
            FileID::from_relative_path(at_dir, pathname, None, FileType::Uninitialized)
        }
    }

    /// An entry from a raw [`DirectoryEntry`] listed from `at_dir`.
    ///
    /// When `stat_info_known_valid` is set, any stat info carried by `entry` is trusted and
    /// we skip our own `stat`. Otherwise only the kind reported by the listing is used.
    pub fn from_dir_entry(
        at_dir: Arc<FileID>,
        entry: &DirectoryEntry,
        stat_info_known_valid: bool,
    ) -> Self {
        let stat = entry.stat.as_ref().filter(|_| stat_info_known_valid);
        FileID::from_relative_path(at_dir, entry.name.as_str(), stat, entry.kind)
    }

    fn from_parts(name: EntryName, cache: UnsynchronizedFileID) -> Self {
        FileID {
            entry: Some(Entry {
                name,
                cache: RwLock::new(cache),
            }),
        }
    }

    /// Returns `true` if this handle has no state, i.e. it was created with
    /// [`FileID::default`] or its contents were moved out with [`std::mem::take`].
    ///
    /// Accessors on an empty handle return empty values: a basename and path of `""`, a type
    /// of [`FileType::Uninitialized`], sizes of 0, and [`UniqueFileIdentifier::INVALID`].
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    fn name(&self) -> Option<&EntryName> {
        self.entry.as_ref().map(|entry| &entry.name)
    }

    /// Name of this entry within [`FileID::at_dir`], or the full path if it's standalone.
    pub fn basename(&self) -> Arc<str> {
        self.name()
            .map_or_else(|| Arc::from(""), |name| Arc::clone(&name.basename))
    }

    /// The name to resolve relative to [`FileID::at_dir`].
    pub fn at_dir_relative_basename(&self) -> Arc<str> {
        self.basename()
    }

    /// Full path of this entry, built once from the chain of parent directories.
    pub fn path(&self) -> Arc<str> {
        self.read_or_populate(
            || Arc::from(""),
            |cache| cache.cached_path().cloned(),
            |cache, name| cache.path(name),
        )
    }

    /// Returns an open descriptor for this entry, opening it relative to the parent
    /// directory's descriptor if necessary.
    ///
    /// Failures are not cached, calling this again will retry the open.
    pub fn file_descriptor(&self) -> Result<DescriptorRef<'_>, crate::Error> {
        let handle = self.read_or_populate(
            || Err(crate::Error::EmptyHandle),
            |cache| cache.cached_file_descriptor().map(|fd| Ok(fd.as_raw())),
            |cache, name| cache.file_descriptor(name).map(|fd| fd.as_raw()),
        )?;

        // The descriptor is only closed when we're dropped or mutably borrowed, neither of
        // which can happen while `&self` is borrowed.
        Ok(DescriptorRef::new(handle))
    }

    /// Moves the open descriptor, if any, out of this handle. The next call to
    /// [`FileID::file_descriptor`] opens a new one.
    pub fn take_file_descriptor(&mut self) -> Option<FileDescriptor> {
        let entry = self.entry.as_mut()?;
        entry.cache.get_mut().take_file_descriptor(&entry.name)
    }

    /// Returns the type of this entry, loading stat info if it isn't known yet.
    pub fn file_type(&self) -> FileType {
        self.read_or_populate(
            || FileType::Uninitialized,
            |cache| cache.cached_file_type(),
            |cache, name| cache.file_type(name),
        )
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type() == FileType::RegularFile
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Returns `true` only for the handle created with [`FileID::cwd`].
    pub fn is_at_fd_cwd(&self) -> bool {
        self.name().is_some_and(EntryName::is_cwd)
    }

    /// The directory this entry is resolved relative to.
    pub fn at_dir(&self) -> Option<Arc<FileID>> {
        self.at_dir_ref().cloned()
    }

    /// Borrow the directory this entry is resolved relative to, without bumping its
    /// reference count.
    pub fn at_dir_ref(&self) -> Option<&Arc<FileID>> {
        self.name().and_then(|name| name.at_dir.as_ref())
    }

    /// Returns `true` if stat info has been loaded, without loading it.
    pub fn is_stat_info_valid(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.cache.read().is_stat_info_valid())
    }

    /// Returns all of the stat info for this entry, loading it if necessary.
    ///
    /// `None` if the entry could not be `stat`-ed.
    pub fn stat_info(&self) -> Option<FileStat> {
        self.read_or_populate(
            || None,
            |cache| cache.cached_stat_info(),
            |cache, name| cache.stat_info(name),
        )
    }

    /// Size of the file in bytes, 0 if the entry could not be `stat`-ed.
    pub fn file_size(&self) -> u64 {
        self.stat_info().map_or(0, |stat| stat.size)
    }

    /// Preferred I/O block size, 0 if the entry could not be `stat`-ed.
    pub fn block_size(&self) -> u64 {
        self.stat_info().map_or(0, |stat| stat.block_size)
    }

    /// Number of 512 byte blocks allocated, 0 if the entry could not be `stat`-ed.
    pub fn blocks(&self) -> u64 {
        self.stat_info().map_or(0, |stat| stat.blocks)
    }

    /// Identity of the underlying file, [`UniqueFileIdentifier::INVALID`] if the entry could
    /// not be `stat`-ed.
    pub fn unique_file_identifier(&self) -> UniqueFileIdentifier {
        self.read_or_populate(
            || UniqueFileIdentifier::INVALID,
            |cache| cache.cached_unique_file_identifier(),
            |cache, name| cache.unique_file_identifier(name),
        )
    }

    /// Device containing the file, 0 if the entry could not be `stat`-ed.
    pub fn dev(&self) -> u64 {
        self.unique_file_identifier().dev()
    }

    /// Provide the identity of this entry, e.g. when the walker already knows it, so we
    /// don't have to `stat` to learn it.
    ///
    /// Only this handle is affected, never the parent or any copies. Once stat info is
    /// loaded the identity comes from it and this is a no-op.
    pub fn set_dev_ino(&self, dev: u64, inode: u64) {
        if let Some(entry) = &self.entry {
            entry.cache.write().set_dev_ino(dev, inode);
        }
    }

    /// Returns a cached value with just a read lock, or takes the write lock and populates
    /// it.
    ///
    /// Whichever thread gets the write lock first populates the value, everyone after it
    /// observes the cached result, so `populate` runs at most once per value.
    fn read_or_populate<T>(
        &self,
        empty: impl FnOnce() -> T,
        cached: impl Fn(&UnsynchronizedFileID) -> Option<T>,
        populate: impl FnOnce(&mut UnsynchronizedFileID, &EntryName) -> T,
    ) -> T {
        let Some(entry) = &self.entry else {
            return empty();
        };

        {
            let cache = entry.cache.read();
            if let Some(val) = cached(&*cache) {
                return val;
            }
        }

        let mut cache = entry.cache.write();
        // Someone else might have populated the value while we waited for the lock.
        match cached(&*cache) {
            Some(val) => val,
            None => populate(&mut *cache, &entry.name),
        }
    }
}

#[cfg(test)]
impl FileID {
    /// Hold the write lock on the cache, as a populating accessor does for its syscall.
    pub(crate) fn lock_cache(&self) -> Option<impl Sized + '_> {
        self.entry.as_ref().map(|entry| entry.cache.write())
    }
}

impl fmt::Debug for FileID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(entry) = &self.entry else {
            return f.write_str("FileID(<empty>)");
        };

        let mut debug = f.debug_struct("FileID");
        debug.field("name", &entry.name);
        // Don't block, or deadlock, if someone is populating a cache.
        match entry.cache.try_read() {
            Some(cache) => debug.field("cache", &*cache),
            None => debug.field("cache", &"<locked>"),
        };
        debug.finish()
    }
}
