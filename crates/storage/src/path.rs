//! Path validation and security utilities.
//!
//! Block file names and relative paths arrive from project files written by
//! other processes (or other versions), so none of them may be trusted to stay
//! inside the project's data directory.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Lexically resolve a path relative to some data directory.
///
/// `.` and repeated separators vanish and `..` cancels the previous
/// component. The result must name something strictly below the root: a path
/// that climbs out, resolves to nothing, carries a drive prefix or contains a
/// null byte is an [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// ```
/// use std::path::Path;
/// use aup_storage::normalize_relative;
/// assert_eq!(normalize_relative("e00/./d00//e0000001.au").unwrap(), Path::new("e00/d00/e0000001.au"));
/// assert_eq!(normalize_relative("e00/../e01").unwrap(), Path::new("e01"));
/// assert!(normalize_relative("../song_data").is_err());
/// ```
pub fn normalize_relative(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir => continue,
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if !resolved.pop() {
                    exn::bail!(invalid());
                }
            },
            // Would be truncated by the C-level syscalls.
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(part) => resolved.push(part),
        }
    }
    if resolved.as_os_str().is_empty() {
        exn::bail!(invalid());
    }
    Ok(resolved)
}

/// Validates a bare file name: exactly one normal path component, no
/// separators of either flavour, no null bytes, not `.` or `..`.
///
/// ```
/// use aup_storage::validate_file_name;
/// assert!(validate_file_name("e0000a1b.au").is_ok());
/// assert!(validate_file_name("e00/e0000a1b.au").is_err());
/// assert!(validate_file_name("..").is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains(':');
    if bad {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(name)));
    }
    Ok(name)
}

/// Returns `true` when `path` is lexically inside `root` (or is `root`).
///
/// Purely lexical: symlinks are not resolved. Callers use this to keep
/// destructive operations inside a project or temp tree.
pub fn is_within(root: impl AsRef<Path>, path: impl AsRef<Path>) -> bool {
    let Ok(relative) = path.as_ref().strip_prefix(root.as_ref()) else {
        return false;
    };
    relative.as_os_str().is_empty() || normalize_relative(relative).is_ok()
}
