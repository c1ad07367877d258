//! The state behind a [`FileID`]: a name fixed at construction, and caches that are
//! populated lazily.

use std::sync::Arc;

use derivative::Derivative;

use crate::descriptor::{DescriptorRef, FileDescriptor};
use crate::file_id::FileID;
use crate::platform::{FilesystemPlatform, OpenOptions, Platform, PlatformPath, PlatformPathType};
use crate::{FileStat, FileType, UniqueFileIdentifier};

/// How an entry is named.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum Origin {
    /// The current working directory.
    Cwd,
    /// `basename` is a name within `at_dir`.
    Relative,
    /// `basename` is a full path, `at_dir` is only used as a handle to resolve against.
    Absolute,
}

/// Everything that identifies an entry by name. Never changes after construction, so it's
/// read without taking any lock.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(super) struct EntryName {
    /// Name within `at_dir`, or the whole path for [`Origin::Absolute`] entries.
    pub(super) basename: Arc<str>,
    pub(super) origin: Origin,
    /// Directory `basename` is resolved relative to, `None` resolves against the CWD.
    #[derivative(Debug = "ignore")]
    pub(super) at_dir: Option<Arc<FileID>>,
}

impl EntryName {
    pub(super) fn cwd() -> Self {
        EntryName {
            basename: Arc::from("."),
            origin: Origin::Cwd,
            at_dir: None,
        }
    }

    pub(super) fn relative(at_dir: Arc<FileID>, basename: Arc<str>) -> Self {
        EntryName {
            basename,
            origin: Origin::Relative,
            at_dir: Some(at_dir),
        }
    }

    pub(super) fn absolute(at_dir: Option<Arc<FileID>>, pathname: Arc<str>) -> Self {
        EntryName {
            basename: pathname,
            origin: Origin::Absolute,
            at_dir,
        }
    }

    pub(super) fn is_cwd(&self) -> bool {
        self.origin == Origin::Cwd
    }
}

/// The lazily populated state for one [`FileID`], with no locking.
///
/// Every method that takes `&mut self` may populate a cache, once populated a value never
/// changes. A failed `stat` is cached too: the entry is classified as
/// [`FileType::StatFailed`] unless its type was already known.
#[derive(Debug)]
pub(super) struct UnsynchronizedFileID {
    /// Lazily built from the chain of `at_dir`s.
    path: Option<Arc<str>>,
    /// Lazily opened.
    file_descriptor: Option<FileDescriptor>,
    file_type: FileType,
    /// `Some` once we've loaded stat info.
    stat: Option<FileStat>,
    /// Set once a `stat` has failed, it's never retried.
    stat_failed: bool,
    /// Identity from `stat`, or provided by whoever constructed us.
    unique_file_identifier: Option<UniqueFileIdentifier>,
}

impl UnsynchronizedFileID {
    pub(super) fn cwd() -> Self {
        UnsynchronizedFileID {
            path: Some(Arc::from(".")),
            file_descriptor: Some(FileDescriptor::cwd()),
            ..UnsynchronizedFileID::new(FileType::Directory)
        }
    }

    pub(super) fn new(file_type: FileType) -> Self {
        UnsynchronizedFileID {
            path: None,
            file_descriptor: None,
            file_type,
            stat: None,
            stat_failed: false,
            unique_file_identifier: None,
        }
    }

    /// An entry whose path is already known, e.g. it was named by an absolute path.
    pub(super) fn with_path(mut self, path: Arc<str>) -> Self {
        self.path = Some(path);
        self
    }

    pub(super) fn with_stat_info(mut self, stat: &FileStat) -> Self {
        self.set_stat_info(stat);
        self
    }

    pub(super) fn cached_path(&self) -> Option<&Arc<str>> {
        self.path.as_ref()
    }

    pub(super) fn path(&mut self, name: &EntryName) -> Arc<str> {
        if let Some(path) = &self.path {
            return Arc::clone(path);
        }

        let path = match &name.at_dir {
            // Children of the CWD are named as-is, e.g. "etc" and not "./etc".
            Some(at_dir) if name.origin == Origin::Relative && !at_dir.is_at_fd_cwd() => {
                Arc::from(join_path(&at_dir.path(), &name.basename))
            }
            _ => Arc::clone(&name.basename),
        };
        tracing::trace!(%path, "computed path");

        self.path = Some(Arc::clone(&path));
        path
    }

    pub(super) fn cached_file_descriptor(&self) -> Option<DescriptorRef<'_>> {
        self.file_descriptor
            .as_ref()
            .map(FileDescriptor::as_descriptor_ref)
    }

    pub(super) fn file_descriptor(
        &mut self,
        name: &EntryName,
    ) -> Result<DescriptorRef<'_>, crate::Error> {
        let file_descriptor = match self.file_descriptor.take() {
            Some(fd) => fd,
            None => self.open(name)?,
        };
        Ok(self.file_descriptor.insert(file_descriptor).as_descriptor_ref())
    }

    pub(super) fn take_file_descriptor(&mut self, name: &EntryName) -> Option<FileDescriptor> {
        // Nothing to hand out, the CWD is never closed.
        if name.is_cwd() {
            return None;
        }
        self.file_descriptor.take()
    }

    fn open(&self, name: &EntryName) -> Result<FileDescriptor, crate::Error> {
        if name.is_cwd() {
            return Ok(FileDescriptor::cwd());
        }

        let options = if self.file_type == FileType::Directory {
            OpenOptions::DIRECTORY
        } else {
            OpenOptions::READ_ONLY
        };

        let file_descriptor = match &name.at_dir {
            Some(at_dir) => {
                FileDescriptor::openat(at_dir.file_descriptor()?, &name.basename, options)?
            }
            None => FileDescriptor::open(&name.basename, options)?,
        };
        tracing::trace!(basename = %name.basename, "opened file descriptor");

        Ok(file_descriptor)
    }

    pub(super) fn cached_file_type(&self) -> Option<FileType> {
        (!self.file_type.is_uninitialized()).then_some(self.file_type)
    }

    pub(super) fn file_type(&mut self, name: &EntryName) -> FileType {
        if self.file_type.is_uninitialized() {
            self.lazy_load_stat_info(name);
        }
        self.file_type
    }

    pub(super) fn is_stat_info_valid(&self) -> bool {
        self.stat.is_some()
    }

    /// Returns `Some(None)` if we already tried, and failed, to load stat info.
    pub(super) fn cached_stat_info(&self) -> Option<Option<FileStat>> {
        match self.stat {
            Some(stat) => Some(Some(stat)),
            None if self.stat_failed => Some(None),
            None => None,
        }
    }

    pub(super) fn stat_info(&mut self, name: &EntryName) -> Option<FileStat> {
        self.lazy_load_stat_info(name);
        self.stat
    }

    pub(super) fn cached_unique_file_identifier(&self) -> Option<UniqueFileIdentifier> {
        match self.unique_file_identifier {
            Some(id) => Some(id),
            None if self.stat_failed => Some(UniqueFileIdentifier::INVALID),
            None => None,
        }
    }

    pub(super) fn unique_file_identifier(&mut self, name: &EntryName) -> UniqueFileIdentifier {
        if self.unique_file_identifier.is_none() {
            self.lazy_load_stat_info(name);
        }
        self.unique_file_identifier
            .unwrap_or(UniqueFileIdentifier::INVALID)
    }

    /// Ignored once stat info is loaded, the identity then always matches the stat info.
    pub(super) fn set_dev_ino(&mut self, dev: u64, inode: u64) {
        if let Some(stat) = &self.stat {
            tracing::debug!(
                current = %stat.unique_file_identifier(),
                ignored = %UniqueFileIdentifier::new(dev, inode),
                "stat info already loaded, not overriding identity"
            );
            return;
        }
        self.unique_file_identifier = Some(UniqueFileIdentifier::new(dev, inode));
    }

    fn set_stat_info(&mut self, stat: &FileStat) {
        self.stat = Some(*stat);
        if self.file_type.is_uninitialized() {
            self.file_type = stat.kind;
        }
        if self.unique_file_identifier.is_none() {
            self.unique_file_identifier = Some(stat.unique_file_identifier());
        }
    }

    /// Load stat info if we haven't already tried to.
    ///
    /// A failure is permanent for this instance, we never re-stat.
    fn lazy_load_stat_info(&mut self, name: &EntryName) {
        if self.stat.is_some() || self.stat_failed {
            return;
        }

        match self.stat_uncached(name) {
            Ok(stat) => {
                tracing::trace!(basename = %name.basename, kind = ?stat.kind, "loaded stat info");
                self.set_stat_info(&stat);
            }
            Err(err) => {
                tracing::debug!(basename = %name.basename, %err, "failed to stat");
                self.stat_failed = true;
                // A type reported by the directory listing stays, it was already handed out.
                if self.file_type.is_uninitialized() {
                    self.file_type = FileType::StatFailed;
                }
            }
        }
    }

    fn stat_uncached(&self, name: &EntryName) -> Result<FileStat, crate::Error> {
        // An open descriptor means we don't have to resolve the name again.
        if let Some(fd) = &self.file_descriptor {
            if !fd.is_cwd() {
                return fd.as_descriptor_ref().stat();
            }
        }

        match &name.at_dir {
            Some(at_dir) => at_dir.file_descriptor()?.stat_at(&name.basename),
            None => {
                let path = PlatformPathType::try_new(&name.basename)?;
                FilesystemPlatform::stat(path)
            }
        }
    }
}

impl Clone for UnsynchronizedFileID {
    /// Clones everything but an open descriptor, each copy opens its own.
    fn clone(&self) -> Self {
        let file_descriptor = self
            .file_descriptor
            .as_ref()
            .filter(|fd| fd.is_cwd())
            .map(|_| FileDescriptor::cwd());

        UnsynchronizedFileID {
            path: self.path.clone(),
            file_descriptor,
            file_type: self.file_type,
            stat: self.stat,
            stat_failed: self.stat_failed,
            unique_file_identifier: self.unique_file_identifier,
        }
    }
}

fn join_path(dir: &str, basename: &str) -> String {
    let mut path = String::with_capacity(dir.len() + 1 + basename.len());
    path.push_str(dir);
    if !dir.ends_with('/') {
        path.push('/');
    }
    path.push_str(basename);
    path
}
