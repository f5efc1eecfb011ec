//! Filesystem trait and implementations.
//!
//! Everything that touches a project tree (listing, directory creation, hard
//! links, copies, deletes) goes through [`Filesystem`] so relocation, scans
//! and allocation can be exercised against injected failures in tests.

#[cfg(any(test, feature = "mock"))]
mod fault;
mod local;

#[cfg(any(test, feature = "mock"))]
pub use self::fault::FaultyFs;
pub use self::local::LocalFs;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    /// Symlinks are reported as files, never followed.
    pub is_dir: bool,
}

/// Unified interface for the filesystem operations the block store needs.
///
/// Paths are absolute. Implementations map [`std::io::Error`]s through
/// [`ErrorKind::from_io`](crate::error::ErrorKind::from_io) so callers can
/// match on [`NotFound`](crate::error::ErrorKind::NotFound) and friends.
///
/// # Examples
///
/// ```
/// use aup_storage::{Filesystem, LocalFs, error::Result};
/// use std::path::Path;
///
/// fn stash(fs: &dyn Filesystem, dir: &Path) -> Result<()> {
///     fs.create_dir_all(dir)?;
///     fs.write(&dir.join("e0000abc.au"), b".snd")
/// }
/// ```
pub trait Filesystem: Send + Sync {
    /// Name of the implementation (used for logging only).
    fn name(&self) -> &str;

    /// Check if a file or directory exists. Errors other than "not found"
    /// are treated as "exists" so callers never clobber what they can't see.
    fn exists(&self, path: &Path) -> bool;

    /// Returns `true` if the path exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Returns `true` if the path is on a read-only mount or has read-only
    /// permissions.
    fn is_read_only(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all of its missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Entries directly inside `dir`, sorted by file name.
    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntry>>;

    /// Remove a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Read file contents.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create (or overwrite) a file with the given contents.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Create `to` as a hard link of `from`. Fails if `to` exists.
    fn hard_link(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy the bytes of `from` into a new file `to`. Fails if `to` exists.
    fn copy(&self, from: &Path, to: &Path) -> Result<u64>;

    /// Bytes available to the current user on the volume holding `path`.
    fn available_space(&self, path: &Path) -> Result<u64>;

    /// CRC32 of a file's contents.
    ///
    /// Default implementation reads the whole file with [`read()`](Self::read).
    fn checksum(&self, path: &Path) -> Result<u32> {
        Ok(crc32fast::hash(&self.read(path)?))
    }
}
