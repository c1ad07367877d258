//! Owned and borrowed handles to open filesystem objects.

use std::marker::PhantomData;

use crate::platform::{
    FilesystemPlatform, OpenOptions, Platform, PlatformFilename, PlatformFilenameType,
    PlatformHandleType, PlatformPath, PlatformPathType,
};
use crate::{DirectoryEntry, FileStat};

/// An owned handle to an object on the filesystem, generally a file descriptor.
///
/// The handle is closed when the [`FileDescriptor`] is dropped, unless it's the sentinel for
/// the current working directory which is never closed.
#[derive(Debug)]
pub struct FileDescriptor {
    /// Actual platform handle, `None` once ownership has been transferred out.
    inner: Option<PlatformHandleType>,
    /// Whether we're responsible for closing `inner`.
    owned: bool,
}

impl FileDescriptor {
    /// The current working directory, resolving relative to it is free.
    pub fn cwd() -> Self {
        FileDescriptor {
            inner: Some(FilesystemPlatform::cwd_handle()),
            owned: false,
        }
    }

    /// Open `path` resolved against the current working directory.
    pub fn open(path: &str, options: OpenOptions) -> Result<Self, crate::Error> {
        let path = PlatformPathType::try_new(path)?;
        let handle = FilesystemPlatform::open(path, options)?;
        Ok(FileDescriptor::from_raw(handle))
    }

    /// Open `filename` resolved relative to the directory `dir`.
    pub fn openat(
        dir: DescriptorRef<'_>,
        filename: &str,
        options: OpenOptions,
    ) -> Result<Self, crate::Error> {
        let filename = PlatformFilenameType::try_new(filename)?;
        let handle = FilesystemPlatform::openat(dir.handle, filename, options)?;
        Ok(FileDescriptor::from_raw(handle))
    }

    /// Take ownership of an already open platform handle.
    pub fn from_raw(handle: PlatformHandleType) -> Self {
        FileDescriptor {
            inner: Some(handle),
            owned: true,
        }
    }

    /// Borrow this descriptor.
    pub fn as_descriptor_ref(&self) -> DescriptorRef<'_> {
        DescriptorRef::new(self.to_inner())
    }

    pub fn is_cwd(&self) -> bool {
        !self.owned
    }

    /// Release ownership of the platform handle, the caller is now responsible for closing it.
    pub fn into_raw(mut self) -> PlatformHandleType {
        self.owned = false;
        self.inner
            .take()
            .expect("programming error, descriptor dropped?")
    }

    /// Close the descriptor, reporting any failure instead of logging it.
    pub fn close(mut self) -> Result<(), crate::Error> {
        let handle = self
            .inner
            .take()
            .expect("programming error, descriptor dropped?");
        if self.owned {
            FilesystemPlatform::close(handle)?;
        }
        Ok(())
    }

    fn to_inner(&self) -> PlatformHandleType {
        self.inner.expect("programming error, descriptor dropped?")
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        let Some(handle) = self.inner.take() else {
            return;
        };
        if !self.owned {
            return;
        }

        if let Err(err) = FilesystemPlatform::close(handle) {
            tracing::warn!(?handle, %err, "failed to close file descriptor");
        }
    }
}

/// A borrowed [`FileDescriptor`], valid for as long as its owner is borrowed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DescriptorRef<'a> {
    handle: PlatformHandleType,
    _owner: PhantomData<&'a FileDescriptor>,
}

impl<'a> DescriptorRef<'a> {
    /// The caller guarantees `handle` stays open for all of `'a`.
    pub(crate) fn new(handle: PlatformHandleType) -> Self {
        DescriptorRef {
            handle,
            _owner: PhantomData,
        }
    }

    pub fn as_raw(&self) -> PlatformHandleType {
        self.handle
    }

    pub fn is_cwd(&self) -> bool {
        self.handle == FilesystemPlatform::cwd_handle()
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Does not move a file offset, so many threads can read through the same descriptor.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, crate::Error> {
        FilesystemPlatform::pread(self.handle, buf, offset)
    }

    /// Get metadata about the open object.
    pub fn stat(&self) -> Result<FileStat, crate::Error> {
        FilesystemPlatform::fstat(self.handle)
    }

    /// Get metadata about `filename`, resolved relative to this directory.
    pub fn stat_at(&self, filename: &str) -> Result<FileStat, crate::Error> {
        let filename = PlatformFilenameType::try_new(filename)?;
        FilesystemPlatform::fstatat(self.handle, filename)
    }

    /// List all of the entries in this directory.
    pub fn list(&self) -> Result<Vec<DirectoryEntry>, crate::Error> {
        FilesystemPlatform::listdir(self.handle)
    }

    /// List all of the entries in this directory, including a `stat` of each.
    pub fn list_with_stat(&self) -> Result<Vec<DirectoryEntry>, crate::Error> {
        FilesystemPlatform::listdir_with_stat(self.handle)
    }
}
