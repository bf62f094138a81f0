use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// Errors reported by paths, handles and handlers.
#[derive(Error, Debug)]
pub enum FsError {
    /// The supplied name or path string is malformed for the backend.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The entry is absent where its presence is required.
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
    /// A directory was required.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    /// A non-directory was required.
    #[error("{} is a directory", .0.display())]
    IsADirectory(PathBuf),
    /// Exclusive creation hit an existing entry.
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    /// A directory that must be empty is not.
    #[error("directory {} is not empty", .0.display())]
    DirectoryNotEmpty(PathBuf),
    /// The operation needs a native representation that one of the sides does not have.
    #[error("operation across backends is not supported: {0}")]
    CrossBackend(String),
    /// The backend does not implement the operation at all.
    #[error("operation is not supported: {0}")]
    Unsupported(String),
    /// An argument other than a path is malformed (open mode, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Backend-reported I/O failure not covered above.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Failure of a third-party backend.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Discriminant of [`FsError`] for matching without borrowing the payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    InvalidPath,
    NotFound,
    NotADirectory,
    IsADirectory,
    AlreadyExists,
    DirectoryNotEmpty,
    CrossBackend,
    Unsupported,
    InvalidInput,
    Io,
    Backend,
}

impl FsError {
    /// Classifies a host I/O error that happened while operating on `path`.
    pub fn from_io<P: AsRef<Path>>(err: io::Error, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            io::ErrorKind::NotADirectory => FsError::NotADirectory(path),
            io::ErrorKind::IsADirectory => FsError::IsADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty(path),
            io::ErrorKind::InvalidInput => {
                FsError::InvalidInput(format!("{}: {err}", path.display()))
            }
            _ => FsError::Io(err),
        }
    }

    pub fn kind(&self) -> FsErrorKind {
        match self {
            FsError::InvalidPath(_) => FsErrorKind::InvalidPath,
            FsError::NotFound(_) => FsErrorKind::NotFound,
            FsError::NotADirectory(_) => FsErrorKind::NotADirectory,
            FsError::IsADirectory(_) => FsErrorKind::IsADirectory,
            FsError::AlreadyExists(_) => FsErrorKind::AlreadyExists,
            FsError::DirectoryNotEmpty(_) => FsErrorKind::DirectoryNotEmpty,
            FsError::CrossBackend(_) => FsErrorKind::CrossBackend,
            FsError::Unsupported(_) => FsErrorKind::Unsupported,
            FsError::InvalidInput(_) => FsErrorKind::InvalidInput,
            FsError::Io(_) => FsErrorKind::Io,
            FsError::Backend(_) => FsErrorKind::Backend,
        }
    }

    /// Returns true for kinds a caller can act on by changing its request
    /// (create the parent, pick another name, ...). Backend failures and
    /// unsupported operations must be propagated.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            FsErrorKind::NotFound
                | FsErrorKind::NotADirectory
                | FsErrorKind::IsADirectory
                | FsErrorKind::AlreadyExists
                | FsErrorKind::DirectoryNotEmpty
        )
    }
}
