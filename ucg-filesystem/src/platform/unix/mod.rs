use std::ffi::CStr;
use std::mem::MaybeUninit;

use crate::platform::counters;
use crate::platform::{OpenOptions, Platform, PlatformFilename};
use crate::{DirectoryEntry, FileStat, FileType};

mod path;
#[cfg(test)]
mod tests;

pub use path::{UnixFilename, UnixPath};

pub struct UnixPlatform;

fn check_result(val: libc::c_int) -> Result<libc::c_int, crate::Error> {
    if val == -1 {
        Err(last_error())
    } else {
        Ok(val)
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        use libc::__errno_location as errno_location;
    } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
        use libc::__error as errno_location;
    } else {
        use libc::__errno as errno_location;
    }
}

/// `readdir` only reports failure through `errno`, it must be cleared before each call.
fn clear_errno() {
    // SAFETY: The errno location is valid for the life of the current thread.
    unsafe { *errno_location() = 0 };
}

fn last_error() -> crate::Error {
    let err = std::io::Error::last_os_error().raw_os_error();
    crate::Error::from_unix_sys(err.unwrap_or(-1))
}

fn open_flags(options: OpenOptions) -> libc::c_int {
    // We only ever read, and never want a descriptor to leak into a child process.
    // `O_NONBLOCK` keeps opening a fifo from waiting on a writer, it has no effect on
    // regular files or directories.
    let mut flags = libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOCTTY | libc::O_NONBLOCK;
    if options.contains(OpenOptions::DIRECTORY) {
        flags |= libc::O_DIRECTORY;
    }
    flags
}

impl Platform for UnixPlatform {
    type Path = UnixPath;
    type Filename = UnixFilename;

    type Handle = libc::c_int;

    fn cwd_handle() -> Self::Handle {
        libc::AT_FDCWD
    }

    fn open(path: Self::Path, options: OpenOptions) -> Result<Self::Handle, crate::Error> {
        counters::record_open();
        let result = unsafe { libc::open(path.as_ptr(), open_flags(options)) };
        check_result(result)
    }

    fn openat(
        handle: Self::Handle,
        filename: Self::Filename,
        options: OpenOptions,
    ) -> Result<Self::Handle, crate::Error> {
        counters::record_open();
        let result = unsafe { libc::openat(handle, filename.as_ptr(), open_flags(options)) };
        check_result(result)
    }

    fn close(handle: Self::Handle) -> Result<(), crate::Error> {
        counters::record_close();
        let result = unsafe { libc::close(handle) };
        check_result(result)?;
        Ok(())
    }

    fn stat(path: Self::Path) -> Result<FileStat, crate::Error> {
        let mut raw_stat = MaybeUninit::<libc::stat>::uninit();

        counters::record_stat();
        let result = unsafe { libc::stat(path.as_ptr(), raw_stat.as_mut_ptr()) };
        check_result(result)?;

        // SAFETY: `stat` succeeded, so the kernel filled in the buffer.
        let raw_stat = unsafe { raw_stat.assume_init() };
        FileStat::try_from(raw_stat)
    }

    fn fstat(handle: Self::Handle) -> Result<FileStat, crate::Error> {
        let mut raw_stat = MaybeUninit::<libc::stat>::uninit();

        counters::record_stat();
        let result = unsafe { libc::fstat(handle, raw_stat.as_mut_ptr()) };
        check_result(result)?;

        // SAFETY: `fstat` succeeded, so the kernel filled in the buffer.
        let raw_stat = unsafe { raw_stat.assume_init() };
        FileStat::try_from(raw_stat)
    }

    fn fstatat(handle: Self::Handle, filename: Self::Filename) -> Result<FileStat, crate::Error> {
        let mut raw_stat = MaybeUninit::<libc::stat>::uninit();

        // Follows symlinks, a link reports the identity of its target.
        counters::record_stat();
        let result =
            unsafe { libc::fstatat(handle, filename.as_ptr(), raw_stat.as_mut_ptr(), 0) };
        check_result(result)?;

        // SAFETY: `fstatat` succeeded, so the kernel filled in the buffer.
        let raw_stat = unsafe { raw_stat.assume_init() };
        FileStat::try_from(raw_stat)
    }

    fn pread(handle: Self::Handle, buf: &mut [u8], offset: u64) -> Result<usize, crate::Error> {
        let offset = libc::off_t::try_from(offset).map_err(|_| {
            let msg = format!("read offset out of range: {offset}").into();
            crate::Error::InvalidData(msg)
        })?;

        let result = unsafe { libc::pread(handle, buf.as_mut_ptr().cast(), buf.len(), offset) };
        match usize::try_from(result) {
            Ok(bytes_read) => Ok(bytes_read),
            Err(_) => Err(last_error()),
        }
    }

    fn listdir(handle: Self::Handle) -> Result<Vec<DirectoryEntry>, crate::Error> {
        // `fdopendir` takes ownership of the descriptor it's given, and a `dup` would share
        // the directory offset with `handle`. Re-open the directory instead so concurrent
        // listings never observe each other.
        let dot = UnixFilename::try_new(".")?;
        let dir_handle = Self::openat(handle, dot, OpenOptions::DIRECTORY)?;

        let dir_stream = unsafe { libc::fdopendir(dir_handle) };
        if dir_stream.is_null() {
            let err = last_error();
            let _ = Self::close(dir_handle);
            return Err(err);
        }

        let mut entries = Vec::new();
        let mut result = Ok(());
        loop {
            clear_errno();
            let dirent = unsafe { libc::readdir(dir_stream) };
            if dirent.is_null() {
                // End of the directory, unless `errno` says otherwise.
                let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                if errno != 0 {
                    result = Err(crate::Error::from_unix_sys(errno));
                }
                break;
            }

            // SAFETY: A non-null result from `readdir` is valid until the next call.
            let dirent = unsafe { &*dirent };
            match directory_entry(dirent) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => (),
                Err(err) => tracing::warn!(%err, "skipping directory entry"),
            }
        }

        // Closing the stream also closes `dir_handle`.
        counters::record_close();
        unsafe { libc::closedir(dir_stream) };

        result?;
        Ok(entries)
    }

    fn listdir_with_stat(handle: Self::Handle) -> Result<Vec<DirectoryEntry>, crate::Error> {
        let mut entries = Self::listdir(handle)?;

        for entry in &mut entries {
            let filename = UnixFilename::try_new(&entry.name)?;
            match Self::fstatat(handle, filename) {
                Ok(stat) => {
                    entry.kind = stat.kind;
                    entry.stat = Some(stat);
                }
                Err(err) => {
                    tracing::debug!(name = %entry.name, %err, "failed to stat directory entry");
                }
            }
        }

        Ok(entries)
    }

    fn file_handle_max() -> Result<usize, crate::Error> {
        let mut limits = MaybeUninit::<libc::rlimit>::uninit();
        let result = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, limits.as_mut_ptr()) };
        check_result(result)?;

        // SAFETY: `getrlimit` succeeded, so the struct is filled in.
        let limits = unsafe { limits.assume_init() };
        Ok(usize::try_from(limits.rlim_cur).unwrap_or(usize::MAX))
    }
}

/// Converts a raw `dirent`, returns `None` for the `.` and `..` entries.
fn directory_entry(dirent: &libc::dirent) -> Result<Option<DirectoryEntry>, crate::Error> {
    // SAFETY: `d_name` is always NUL terminated.
    let raw_name = unsafe { CStr::from_ptr(dirent.d_name.as_ptr()) };
    let raw_bytes = raw_name.to_bytes();
    if raw_bytes == b"." || raw_bytes == b".." {
        return Ok(None);
    }

    let name = std::str::from_utf8(raw_bytes).map_err(|_| {
        let msg = format!("non UTF-8 filename: {}", raw_name.to_string_lossy()).into();
        crate::Error::InvalidData(msg)
    })?;

    let kind = match dirent.d_type {
        libc::DT_DIR => FileType::Directory,
        libc::DT_LNK => FileType::Symlink,
        libc::DT_REG => FileType::RegularFile,
        // The filesystem didn't tell us, we'll have to `stat`.
        libc::DT_UNKNOWN => FileType::Uninitialized,
        _ => FileType::Unknown,
    };

    Ok(Some(DirectoryEntry {
        name: name.to_string(),
        inode: u64::from(dirent.d_ino),
        kind,
        stat: None,
    }))
}

impl TryFrom<libc::stat> for FileStat {
    type Error = crate::Error;

    fn try_from(stat: libc::stat) -> Result<Self, Self::Error> {
        let size = u64::try_from(stat.st_size).map_err(|_| {
            let msg = format!("negative file size: {}", stat.st_size).into();
            crate::Error::InvalidData(msg)
        })?;
        let dev = u64::try_from(stat.st_dev).map_err(|_| {
            let msg = format!("invalid device id: {}", stat.st_dev).into();
            crate::Error::InvalidData(msg)
        })?;
        // Some filesystems report nonsense here, treat it as unknown.
        let block_size = u64::try_from(stat.st_blksize).unwrap_or(0);
        let blocks = u64::try_from(stat.st_blocks).unwrap_or(0);
        let mode = u32::from(stat.st_mode);

        Ok(FileStat {
            kind: FileType::from_unix_mode(mode),
            size,
            block_size,
            blocks,
            dev,
            inode: u64::from(stat.st_ino),
            mode,
        })
    }
}

impl FileType {
    /// Classify the type bits of a `st_mode`.
    pub(crate) fn from_unix_mode(mode: u32) -> FileType {
        let masked_kind = mode & u32::from(libc::S_IFMT);
        if masked_kind == u32::from(libc::S_IFREG) {
            FileType::RegularFile
        } else if masked_kind == u32::from(libc::S_IFDIR) {
            FileType::Directory
        } else if masked_kind == u32::from(libc::S_IFLNK) {
            FileType::Symlink
        } else {
            FileType::Unknown
        }
    }
}

impl crate::Error {
    /// Create an [`Error`] from the `errno` set by a system call.
    ///
    /// [`Error`]: crate::Error
    pub fn from_unix_sys(val: libc::c_int) -> Self {
        match val {
            libc::EACCES | libc::EPERM => crate::Error::PermissionDenied,
            libc::ENOENT => crate::Error::NotFound,
            libc::ENOTDIR => crate::Error::NotADirectory,
            libc::ELOOP => crate::Error::SymlinkLoop,
            libc::EMFILE | libc::ENFILE => crate::Error::TooManyOpenFiles,
            x => crate::Error::Unknown(std::io::Error::from_raw_os_error(x).to_string()),
        }
    }
}
