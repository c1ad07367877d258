use std::borrow::Cow;

/// Errors from filesystem operations.
///
/// These are environmental, e.g. a file vanished or we lack permissions, and are local to a
/// single entry. Callers decide whether to skip, log, or abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("too many levels of symbolic links")]
    SymlinkLoop,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("invalid data: {0}")]
    InvalidData(Cow<'static, str>),
    #[error("operation on an empty FileID")]
    EmptyHandle,
    #[error("unknown error: {0}")]
    Unknown(String),
}
