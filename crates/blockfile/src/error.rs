//! Block File Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A block file error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for block file operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The filesystem refused an operation (see the child error for details).
    #[display("storage error")]
    Storage,
    /// A block name is not a safe file name.
    #[display("invalid block name: {_0}")]
    InvalidName(#[error(not(source))] String),
    /// A tag attribute is missing or could not be parsed.
    #[display("invalid attribute '{attr}' on <{tag}>: {value}")]
    InvalidAttribute {
        tag: &'static str,
        attr: &'static str,
        value: String,
    },
    /// A block claims more samples than this process allows.
    #[display("block length {len} exceeds the maximum of {max} samples")]
    TooLong { len: u64, max: u64 },
    /// Bytes on disk are not a readable `.au` file.
    #[display("malformed sample data in {}", _0.display())]
    Format(#[error(not(source))] PathBuf),
    /// An external audio file could not be read.
    #[display("cannot read aliased audio: {}", _0.display())]
    Alias(#[error(not(source))] PathBuf),
    /// No deserializer is registered under the tag.
    #[display("unknown block tag <{_0}>")]
    UnknownTag(#[error(not(source))] String),
    /// A pre-XML project line could not be interpreted.
    #[display("malformed legacy block entry: {_0}")]
    Legacy(#[error(not(source))] String),
    /// Serialization into the output sink failed.
    #[display("failed to write block XML")]
    Write,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Alias(_))
    }

    /// Returns `true` if the block's serialized form is damaged rather than the
    /// environment it was read in.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::InvalidName(_)
                | Self::InvalidAttribute { .. }
                | Self::TooLong { .. }
                | Self::Format(_)
                | Self::UnknownTag(_)
                | Self::Legacy(_)
        )
    }
}
