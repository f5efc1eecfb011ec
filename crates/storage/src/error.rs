//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions, read-only media)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// File already exists (for operations that require new files)
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// The volume has no space left for the write
    #[display("no space left on device: {}", _0.display())]
    StorageFull(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error on {}: {_1}", _0.display())]
    Io(PathBuf, #[error(source)] IoError),
    /// Path contains invalid characters or escapes its root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// A name filter could not be compiled
    #[display("invalid name pattern: {_0}")]
    InvalidPattern(#[error(not(source))] String),
    /// A copied file does not match its source
    #[display("copy verification failed: {}", _0.display())]
    VerifyFailed(#[error(not(source))] PathBuf),
    /// Failure injected by a test filesystem
    #[display("injected failure: {}", _0.display())]
    Injected(#[error(not(source))] PathBuf),
    /// A long-running operation was cancelled by its caller
    #[display("operation cancelled")]
    Cancelled,
}
impl ErrorKind {
    /// Classify an I/O error against the path it happened on.
    pub fn from_io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied(path.to_path_buf())
            },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_path_buf()),
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                Self::StorageFull(path.to_path_buf())
            },
            _ => Self::Io(path.to_path_buf(), err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(..) | Self::StorageFull(_))
    }

    /// Returns `true` if the error only says the thing is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::ErrorKind as IoKind;

    #[rstest]
    #[case(IoKind::NotFound, "file not found: /a/b")]
    #[case(IoKind::PermissionDenied, "permission denied: /a/b")]
    #[case(IoKind::AlreadyExists, "file already exists: /a/b")]
    #[case(IoKind::StorageFull, "no space left on device: /a/b")]
    fn test_from_io(#[case] kind: IoKind, #[case] expected: &str) {
        let err = ErrorKind::from_io(IoError::from(kind), Path::new("/a/b"));
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::StorageFull(PathBuf::from("/x")).is_retryable());
        assert!(!ErrorKind::NotFound(PathBuf::from("/x")).is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
