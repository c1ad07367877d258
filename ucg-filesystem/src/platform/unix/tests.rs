use crate::platform::counters;
use crate::platform::unix::{UnixFilename, UnixPath};
use crate::platform::{OpenOptions, Platform, PlatformFilename, PlatformPath};
use crate::{Error, FileType};

use super::UnixPlatform;

fn open_dir(temp: &tempfile::TempDir) -> libc::c_int {
    let path = UnixPath::try_new(&temp.path().to_string_lossy()).unwrap();
    UnixPlatform::open(path, OpenOptions::DIRECTORY).unwrap()
}

#[test]
fn smoketest_openat_pread() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("hello.txt"), b"hello world").unwrap();

    let dir = open_dir(&temp);
    let filename = UnixFilename::try_new("hello.txt").unwrap();
    let file = UnixPlatform::openat(dir, filename, OpenOptions::READ_ONLY).unwrap();

    let mut buf = vec![0u8; 32];
    let bytes_read = UnixPlatform::pread(file, &mut buf[..], 6).unwrap();
    assert_eq!(&buf[..bytes_read], b"world");

    // Positional reads don't move the offset, so reading from the start still works.
    let bytes_read = UnixPlatform::pread(file, &mut buf[..], 0).unwrap();
    assert_eq!(&buf[..bytes_read], b"hello world");

    UnixPlatform::close(file).unwrap();
    UnixPlatform::close(dir).unwrap();
}

#[test]
fn smoketest_fstatat() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("data"), vec![7u8; 1000]).unwrap();
    std::fs::create_dir(temp.path().join("nested")).unwrap();

    let dir = open_dir(&temp);

    let before = counters::snapshot();
    let stat = UnixPlatform::fstatat(dir, UnixFilename::try_new("data").unwrap()).unwrap();
    assert_eq!(counters::snapshot().since(&before).stat, 1);

    assert_eq!(stat.kind, FileType::RegularFile);
    assert_eq!(stat.size, 1000);
    assert!(stat.unique_file_identifier().is_valid());

    let stat = UnixPlatform::fstatat(dir, UnixFilename::try_new("nested").unwrap()).unwrap();
    assert_eq!(stat.kind, FileType::Directory);

    let err = UnixPlatform::fstatat(dir, UnixFilename::try_new("missing").unwrap()).unwrap_err();
    assert!(matches!(err, Error::NotFound), "{err:?}");

    UnixPlatform::close(dir).unwrap();
}

#[test]
fn smoketest_listdir() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("a.txt"), b"a").unwrap();
    std::fs::write(temp.path().join("b.txt"), b"bb").unwrap();
    std::fs::create_dir(temp.path().join("sub")).unwrap();

    let dir = open_dir(&temp);

    let mut entries = UnixPlatform::listdir(dir).unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "sub"]);
    assert!(entries.iter().all(|e| e.stat.is_none()));

    // Listing twice sees every entry again.
    let entries = UnixPlatform::listdir(dir).unwrap();
    assert_eq!(entries.len(), 3);

    let mut entries = UnixPlatform::listdir_with_stat(dir).unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let sizes: Vec<_> = entries[..2]
        .iter()
        .map(|e| e.stat.as_ref().unwrap().size)
        .collect();
    assert_eq!(sizes, [1, 2]);
    assert_eq!(entries[2].kind, FileType::Directory);
    assert_eq!(entries[2].inode, entries[2].stat.unwrap().inode);

    UnixPlatform::close(dir).unwrap();
}

#[test]
fn smoketest_cwd_handle() {
    let stat = UnixPlatform::fstatat(
        UnixPlatform::cwd_handle(),
        UnixFilename::try_new(".").unwrap(),
    )
    .unwrap();
    assert_eq!(stat.kind, FileType::Directory);
}

#[test]
fn test_interior_nul() {
    let err = UnixFilename::try_new("bad\0name").unwrap_err();
    assert!(matches!(err, Error::InvalidData(_)), "{err:?}");
    let err = UnixPath::try_new("/tmp/bad\0name").unwrap_err();
    assert!(matches!(err, Error::InvalidData(_)), "{err:?}");
}

#[test]
fn test_errno_mapping() {
    assert!(matches!(
        Error::from_unix_sys(libc::ENOENT),
        Error::NotFound
    ));
    assert!(matches!(
        Error::from_unix_sys(libc::EACCES),
        Error::PermissionDenied
    ));
    assert!(matches!(
        Error::from_unix_sys(libc::EMFILE),
        Error::TooManyOpenFiles
    ));
    assert!(matches!(
        Error::from_unix_sys(libc::EIO),
        Error::Unknown(_)
    ));
}

#[test]
fn test_file_handle_max() {
    assert!(UnixPlatform::file_handle_max().unwrap() > 0);
}

#[test]
fn test_listdir_ignores_stale_errno() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("only.txt"), b"only").unwrap();
    let dir = open_dir(&temp);

    // Leave `errno` set by a failed call on this thread.
    let missing = UnixFilename::try_new("missing").unwrap();
    assert!(UnixPlatform::fstatat(dir, missing).is_err());

    let entries = UnixPlatform::listdir(dir).unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["only.txt"]);

    UnixPlatform::close(dir).unwrap();
}

#[test]
fn test_open_flags() {
    let flags = super::open_flags(OpenOptions::READ_ONLY);
    assert_ne!(flags & libc::O_NONBLOCK, 0);
    assert_ne!(flags & libc::O_CLOEXEC, 0);
    assert_eq!(flags & libc::O_DIRECTORY, 0);

    let flags = super::open_flags(OpenOptions::DIRECTORY);
    assert_ne!(flags & libc::O_DIRECTORY, 0);
}
