use thiserror::Error;

/// Recoverable failures of file system operations.
///
/// A failed operation leaves the on-disk bitmap, directory and headers
/// untouched. Broken invariants are not reported here; they panic.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("name already exists in this directory")]
    AlreadyExists,
    #[error("not enough free sectors on disk")]
    OutOfSpace,
    #[error("directory table is full")]
    DirectoryFull,
    #[error("file is open by another thread")]
    Busy,
    #[error("requested size exceeds the maximum file size")]
    SizeExceeded,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("root directory has no parent")]
    NoParent,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("file name is too long")]
    NameTooLong,
}

pub type Result<T> = std::result::Result<T, FsError>;
