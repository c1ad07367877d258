//! Abstract interface for a specific platform, e.g. `unix`.

use bitflags::bitflags;
use std::fmt::Debug;

use crate::{DirectoryEntry, Error, FileStat};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct OpenOptions: u32 {
        const READ_ONLY = 0b0000_0001;

        /// Restrict opening to just directories.
        const DIRECTORY = 0b0100_0000;
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions::READ_ONLY
    }
}

/// Platform specific filesystem operations.
///
/// Every `*at` operation resolves its filename relative to the provided directory handle, an
/// absolute filename ignores the handle.
pub trait Platform {
    type Path: PlatformPath;
    type Filename: PlatformFilename;

    type Handle: Debug + Copy + Eq;

    /// Handle that refers to the current working directory, it must never be closed.
    fn cwd_handle() -> Self::Handle;

    fn open(path: Self::Path, options: OpenOptions) -> Result<Self::Handle, Error>;
    fn openat(
        handle: Self::Handle,
        filename: Self::Filename,
        options: OpenOptions,
    ) -> Result<Self::Handle, Error>;
    fn close(handle: Self::Handle) -> Result<(), Error>;

    fn stat(path: Self::Path) -> Result<FileStat, Error>;
    fn fstat(handle: Self::Handle) -> Result<FileStat, Error>;
    fn fstatat(handle: Self::Handle, filename: Self::Filename) -> Result<FileStat, Error>;

    /// Read into `buf` starting at `offset`, without moving the handle's file offset.
    fn pread(handle: Self::Handle, buf: &mut [u8], offset: u64) -> Result<usize, Error>;

    fn listdir(handle: Self::Handle) -> Result<Vec<DirectoryEntry>, Error>;
    /// List a directory and `stat` every entry, batching the work a walker would otherwise
    /// do one entry at a time.
    fn listdir_with_stat(handle: Self::Handle) -> Result<Vec<DirectoryEntry>, Error>;

    fn file_handle_max() -> Result<usize, Error>;
}

pub trait PlatformPath: Debug + Clone {
    fn try_new(val: &str) -> Result<Self, crate::Error>;
}

pub trait PlatformFilename: Debug + Clone {
    fn try_new(val: &str) -> Result<Self, crate::Error>;
}

/// Type alias for the [`Platform::Handle`] associated type for the current [`FilesystemPlatform`].
pub type PlatformHandleType = <FilesystemPlatform as Platform>::Handle;
/// Type alias for the [`Platform::Path`] associated type for the current [`FilesystemPlatform`].
pub type PlatformPathType = <FilesystemPlatform as Platform>::Path;
/// Type alias for the [`Platform::Filename`] associated type for the current [`FilesystemPlatform`].
pub type PlatformFilenameType = <FilesystemPlatform as Platform>::Filename;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::UnixPlatform as FilesystemPlatform;
    } else {
        compile_error!("ucg-filesystem only supports unix platforms");
    }
}

/// Per-thread counts of the syscalls issued by the platform layer.
///
/// Counts are kept per thread so concurrent work on other threads never skews a
/// measurement, take a [`snapshot`] before and after an operation on the same thread.
pub mod counters {
    use std::cell::Cell;

    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct SyscallCounts {
        /// Calls to `stat`, `fstat`, and `fstatat`.
        pub stat: u64,
        /// Calls to `open` and `openat`.
        pub open: u64,
        /// Calls to `close`.
        pub close: u64,
    }

    impl SyscallCounts {
        const ZERO: SyscallCounts = SyscallCounts {
            stat: 0,
            open: 0,
            close: 0,
        };

        /// Returns the calls made between `earlier` and `self`.
        pub fn since(&self, earlier: &SyscallCounts) -> SyscallCounts {
            SyscallCounts {
                stat: self.stat - earlier.stat,
                open: self.open - earlier.open,
                close: self.close - earlier.close,
            }
        }
    }

    std::thread_local! {
        static COUNTS: Cell<SyscallCounts> = const { Cell::new(SyscallCounts::ZERO) };
    }

    /// Returns the number of syscalls issued so far by the current thread.
    pub fn snapshot() -> SyscallCounts {
        COUNTS.with(|counts| counts.get())
    }

    fn bump(f: impl FnOnce(&mut SyscallCounts)) {
        COUNTS.with(|counts| {
            let mut current = counts.get();
            f(&mut current);
            counts.set(current);
        });
    }

    pub(crate) fn record_stat() {
        bump(|counts| counts.stat += 1);
    }

    pub(crate) fn record_open() {
        bump(|counts| counts.open += 1);
    }

    pub(crate) fn record_close() {
        bump(|counts| counts.close += 1);
    }
}
