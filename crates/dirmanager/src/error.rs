//! Repository Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::catalog::BlockId;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A repository error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The filesystem refused an operation (see the child error).
    #[display("storage error")]
    Storage,
    /// Constructing, reading or copying a block failed (see the child error).
    #[display("block file error")]
    Block,
    /// No free block name could be found.
    #[display("no free block names left in {}", _0.display())]
    NamesExhausted(#[error(not(source))] PathBuf),
    /// The handle does not refer to a block in this repository.
    #[display("unknown block {_0}")]
    UnknownBlock(#[error(not(source))] BlockId),
    /// A project location failed validation; nothing was changed.
    #[display("cannot use {} as a project: {reason}", path.display())]
    InvalidProject { path: PathBuf, reason: &'static str },
    /// Relocating block files failed and every created file was removed.
    #[display("relocation to {} failed and was rolled back", _0.display())]
    Relocation(#[error(not(source))] PathBuf),
    /// A long-running operation was cancelled by its caller.
    #[display("operation cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Relocation(_))
    }
}
