//! Unix specific paths.

use std::ffi::{c_char, CString};

use crate::platform::{PlatformFilename, PlatformPath};

fn to_c_string(val: &str) -> Result<CString, crate::Error> {
    CString::new(val).map_err(|_| {
        let msg = format!("path contains an interior NUL byte: {val:?}").into();
        crate::Error::InvalidData(msg)
    })
}

/// A path as the kernel sees it, an arbitrary sequence of non-NUL bytes.
///
/// Relative paths are resolved against the process' current working directory.
#[derive(Debug, Clone)]
pub struct UnixPath {
    inner: CString,
}

impl UnixPath {
    pub(crate) fn as_ptr(&self) -> *const c_char {
        self.inner.as_ptr()
    }
}

impl PlatformPath for UnixPath {
    fn try_new(val: &str) -> Result<Self, crate::Error> {
        Ok(UnixPath {
            inner: to_c_string(val)?,
        })
    }
}

/// Name resolved relative to a directory handle.
///
/// Usually a single component, but anything [`UnixPath`] accepts is valid, an absolute
/// filename ignores the directory handle entirely.
#[derive(Debug, Clone)]
pub struct UnixFilename {
    inner: CString,
}

impl UnixFilename {
    pub(crate) fn as_ptr(&self) -> *const c_char {
        self.inner.as_ptr()
    }
}

impl PlatformFilename for UnixFilename {
    fn try_new(val: &str) -> Result<Self, crate::Error> {
        Ok(UnixFilename {
            inner: to_c_string(val)?,
        })
    }
}
