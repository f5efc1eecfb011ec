//! Recursive directory enumeration and cleanup.
//!
//! Every function works through a [`Filesystem`] and never checks *which*
//! tree it is pointed at; keeping it inside a project or temp directory is the
//! caller's job.

use crate::error::{ErrorKind, Result};
use crate::fs::Filesystem;
use crate::progress::{Cancellation, NoProgress, Progress, keep_going};
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Directory names ending in this suffix are project data roots and are never
/// removed by [`remove_empty_dirs`], even when empty.
pub const DATA_DIR_SUFFIX: &str = "_data";

/// Shell-style name filter supporting `*` and `?`. An empty pattern matches
/// everything.
///
/// ```
/// use aup_storage::scan::NameFilter;
/// let filter = NameFilter::new("project*").unwrap();
/// assert!(filter.matches("project1234".as_ref()));
/// assert!(!filter.matches("e00".as_ref()));
/// ```
#[derive(Debug, Clone)]
pub struct NameFilter(Option<Regex>);
impl NameFilter {
    pub fn new(glob: &str) -> Result<Self> {
        if glob.is_empty() || glob == "*" {
            return Ok(Self(None));
        }
        let mut pattern = String::with_capacity(glob.len() + 8);
        pattern.push('^');
        for c in glob.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        pattern.push('$');
        match Regex::new(&pattern) {
            Ok(regex) => Ok(Self(Some(regex))),
            Err(_) => exn::bail!(ErrorKind::InvalidPattern(glob.to_string())),
        }
    }

    pub fn matches(&self, name: &OsStr) -> bool {
        match &self.0 {
            None => true,
            Some(regex) => name.to_str().is_some_and(|name| regex.is_match(name)),
        }
    }
}

/// What to enumerate.
#[derive(Debug, Clone, Copy)]
pub struct EnumerateSpec<'a> {
    /// Filter for subdirectories of the top directory only; deeper
    /// directories are always descended.
    pub dirspec: &'a str,
    /// Filter for file names at every level.
    pub filespec: &'a str,
    /// Collect files.
    pub files: bool,
    /// Collect directories, deepest first, the top directory last.
    pub dirs: bool,
    /// Expected number of entries, only used for progress reporting.
    pub expected: u64,
}
impl<'a> EnumerateSpec<'a> {
    pub fn files(filespec: &'a str) -> Self {
        Self { dirspec: "", filespec, files: true, dirs: false, expected: 0 }
    }

    pub fn dirs(dirspec: &'a str) -> Self {
        Self { dirspec, filespec: "", files: false, dirs: true, expected: 0 }
    }
}

/// Result of [`enumerate`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Enumeration {
    pub paths: Vec<PathBuf>,
    /// Directories that could not be listed and were skipped.
    pub skipped: usize,
}

struct Walk<'w> {
    fs: &'w dyn Filesystem,
    spec: &'w EnumerateSpec<'w>,
    dirspec: NameFilter,
    filespec: NameFilter,
    progress: &'w mut dyn Progress,
    cancel: &'w Cancellation,
    result: Enumeration,
}

impl Walk<'_> {
    fn visit(&mut self, dir: &Path, top: bool) -> Result<()> {
        if !keep_going(self.progress, self.cancel, self.result.paths.len() as u64, self.spec.expected) {
            exn::bail!(ErrorKind::Cancelled);
        }
        match self.fs.read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    if entry.is_dir {
                        let name = entry.path.file_name().unwrap_or_default();
                        if !top || self.dirspec.matches(name) {
                            self.visit(&entry.path, false)?;
                        }
                        continue;
                    }
                    let selective_top = top && !self.spec.dirspec.is_empty();
                    let name = entry.path.file_name().unwrap_or_default();
                    if self.spec.files && !selective_top && self.filespec.matches(name) {
                        self.result.paths.push(entry.path);
                    }
                }
            },
            Err(err) => {
                tracing::warn!(path = %dir.display(), error = %err, "Skipping unreadable directory");
                self.result.skipped += 1;
                if !self.fs.is_dir(dir) {
                    return Ok(());
                }
            },
        }
        if self.spec.dirs {
            self.result.paths.push(dir.to_path_buf());
        }
        Ok(())
    }
}

/// Recursively list files and/or directories below `dir`, in file name order.
///
/// Files directly inside `dir` are only listed when `dirspec` is empty, so a
/// selective top level (e.g. `project*` inside the shared temp dir) never
/// picks up unrelated neighbours. Directories that cannot be listed are
/// skipped and counted. The cancellation token and progress sink are
/// consulted once per directory.
pub fn enumerate(
    fs: &dyn Filesystem,
    dir: &Path,
    spec: &EnumerateSpec<'_>,
    progress: &mut dyn Progress,
    cancel: &Cancellation,
) -> Result<Enumeration> {
    let mut walk = Walk {
        fs,
        spec,
        dirspec: NameFilter::new(spec.dirspec)?,
        filespec: NameFilter::new(spec.filespec)?,
        progress,
        cancel,
        result: Enumeration::default(),
    };
    walk.visit(dir, true)?;
    Ok(walk.result)
}

/// Count every directory below `dir` (not including `dir` itself).
/// Unreadable directories count but are not descended.
pub fn count_subdirs(fs: &dyn Filesystem, dir: &Path) -> usize {
    let Ok(entries) = fs.read_dir(dir) else {
        return 0;
    };
    entries.iter().filter(|entry| entry.is_dir).map(|entry| 1 + count_subdirs(fs, &entry.path)).sum()
}

/// Remove empty directories bottom-up, starting at (and possibly including)
/// `dir`. Directories named `*_data` survive. Returns the number of
/// directories visited.
pub fn remove_empty_dirs(fs: &dyn Filesystem, dir: &Path, total: u64, progress: &mut dyn Progress) -> u64 {
    fn visit(fs: &dyn Filesystem, dir: &Path, total: u64, progress: &mut dyn Progress, count: &mut u64) {
        if let Ok(entries) = fs.read_dir(dir) {
            for entry in entries.iter().filter(|entry| entry.is_dir) {
                visit(fs, &entry.path, total, progress, count);
            }
        }
        let is_data_root = dir.file_name().and_then(OsStr::to_str).is_some_and(|n| n.ends_with(DATA_DIR_SUFFIX));
        let is_empty = fs.read_dir(dir).is_ok_and(|entries| entries.is_empty());
        if is_empty && !is_data_root {
            match fs.remove_dir(dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "Removed empty directory"),
                Err(e) => tracing::debug!(path = %dir.display(), error = %e, "Could not remove empty directory"),
            }
        }
        *count += 1;
        progress.update(*count, total);
    }
    let mut count = 0;
    visit(fs, dir, total, progress, &mut count);
    count
}

/// Options for [`remove_paths`] and [`clean_dir`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanFlags {
    /// Also remove the top directory handed to [`clean_dir`].
    pub top_dir_too: bool,
    /// Only remove directories that are empty; otherwise remove recursively.
    pub dirs_only_if_empty: bool,
}

/// Whether [`remove_paths`] is given files or directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Files,
    Dirs,
}

/// Outcome of a removal pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoveReport {
    pub removed: usize,
    pub failed: usize,
    pub cancelled: bool,
}
impl RemoveReport {
    fn merge(self, other: Self) -> Self {
        Self {
            removed: self.removed + other.removed,
            failed: self.failed + other.failed,
            cancelled: self.cancelled || other.cancelled,
        }
    }
}

/// Remove every path in `paths`, continuing past failures. Progress is
/// reported as `bias + index` of `total`.
pub fn remove_paths(
    fs: &dyn Filesystem,
    paths: &[PathBuf],
    what: Removal,
    flags: CleanFlags,
    bias: u64,
    total: u64,
    progress: &mut dyn Progress,
) -> RemoveReport {
    let mut report = RemoveReport::default();
    for (index, path) in paths.iter().enumerate() {
        let outcome = match what {
            Removal::Files => fs.remove_file(path),
            Removal::Dirs if flags.dirs_only_if_empty => fs.remove_dir(path),
            Removal::Dirs => fs.remove_dir_all(path),
        };
        match outcome {
            Ok(()) => report.removed += 1,
            Err(e) if e.is_not_found() => report.removed += 1,
            Err(e) => {
                // Non-empty directories are expected to fail in the
                // "only if empty" mode; anything else is worth noting.
                if !(what == Removal::Dirs && flags.dirs_only_if_empty) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove");
                }
                report.failed += 1;
            },
        }
        if !progress.update(bias + index as u64 + 1, total) {
            report.cancelled = true;
            break;
        }
    }
    report
}

/// Remove files and directories below `dir` that match the given filters.
///
/// The top directory itself is kept unless [`CleanFlags::top_dir_too`].
pub fn clean_dir(
    fs: &dyn Filesystem,
    dir: &Path,
    dirspec: &str,
    filespec: &str,
    flags: CleanFlags,
    progress: &mut dyn Progress,
) -> Result<RemoveReport> {
    let cancel = Cancellation::default();
    let files_spec = EnumerateSpec { dirspec, filespec, files: true, dirs: false, expected: 0 };
    let dirs_spec = EnumerateSpec { dirspec, filespec, files: false, dirs: true, expected: 0 };
    let files = enumerate(fs, dir, &files_spec, &mut NoProgress, &cancel)?;
    let mut dirs = enumerate(fs, dir, &dirs_spec, &mut NoProgress, &cancel)?;
    if !flags.top_dir_too && dirs.paths.last().is_some_and(|last| last == dir) {
        // The top directory is always listed last.
        dirs.paths.pop();
    }
    let total = (files.paths.len() + dirs.paths.len()) as u64;
    if total == 0 {
        return Ok(RemoveReport::default());
    }
    tracing::debug!(path = %dir.display(), files = files.paths.len(), dirs = dirs.paths.len(), "Cleaning directory");
    let report = remove_paths(fs, &files.paths, Removal::Files, flags, 0, total, progress);
    if report.cancelled {
        return Ok(report);
    }
    let bias = files.paths.len() as u64;
    Ok(report.merge(remove_paths(fs, &dirs.paths, Removal::Dirs, flags, bias, total, progress)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FaultyFs, LocalFs};
    use rstest::rstest;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn names(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        paths.iter().map(|p| p.strip_prefix(root).unwrap().display().to_string()).collect()
    }

    #[rstest]
    #[case("", "anything", true)]
    #[case("*", "anything", true)]
    #[case("*.au", "e0000abc.au", true)]
    #[case("*.au", "e0000abc.auf", false)]
    #[case("*.au?", "e0000abc.auf", true)]
    #[case("project*", "project42", true)]
    #[case("project*", "myproject", false)]
    #[case("e??", "e0a", true)]
    #[case("a.b", "axb", false)]
    fn test_name_filter(#[case] glob: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(NameFilter::new(glob).unwrap().matches(OsStr::new(name)), expected);
    }

    #[test]
    fn test_enumerate_files_recursively() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("e00/d00/e0000001.au"));
        touch(&root.join("e00/d01/e0001002.auf"));
        touch(&root.join("e00/d01/notes.txt"));
        let found = enumerate(&LocalFs, root, &EnumerateSpec::files("*.au*"), &mut NoProgress, &Cancellation::default()).unwrap();
        assert_eq!(names(root, &found.paths), vec!["e00/d00/e0000001.au", "e00/d01/e0001002.auf"]);
        assert_eq!(found.skipped, 0);
    }

    #[test]
    fn test_enumerate_dirs_bottom_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("e00/d00/e0000001.au"));
        let found = enumerate(&LocalFs, root, &EnumerateSpec::dirs(""), &mut NoProgress, &Cancellation::default()).unwrap();
        assert_eq!(found.paths, vec![root.join("e00/d00"), root.join("e00"), root.to_path_buf()]);
    }

    #[test]
    fn test_enumerate_selective_top_level() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("project1/e00/d00/e0000001.au"));
        touch(&root.join("other/keep.au"));
        touch(&root.join("stray.au"));
        let spec = EnumerateSpec { dirspec: "project*", filespec: "", files: true, dirs: false, expected: 0 };
        let found = enumerate(&LocalFs, root, &spec, &mut NoProgress, &Cancellation::default()).unwrap();
        assert_eq!(names(root, &found.paths), vec!["project1/e00/d00/e0000001.au"]);
    }

    #[test]
    fn test_enumerate_cancelled() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(&temp_dir.path().join("e00/d00/e0000001.au"));
        let cancel = Cancellation::default();
        cancel.cancel();
        let err = enumerate(&LocalFs, temp_dir.path(), &EnumerateSpec::files(""), &mut NoProgress, &cancel).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }

    #[test]
    fn test_enumerate_missing_dir_is_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");
        let found = enumerate(&LocalFs, &missing, &EnumerateSpec::files(""), &mut NoProgress, &Cancellation::default()).unwrap();
        assert!(found.paths.is_empty());
        assert_eq!(found.skipped, 1);
    }

    #[test]
    fn test_count_subdirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("e00/d00/a"));
        touch(&root.join("e00/d01/b"));
        touch(&root.join("e01/d00/c"));
        assert_eq!(count_subdirs(&LocalFs, root), 5);
    }

    #[test]
    fn test_remove_empty_dirs_keeps_data_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = temp_dir.path().join("song_data");
        fs::create_dir_all(data.join("e00/d00")).unwrap();
        touch(&data.join("e01/d00/e0100001.au"));
        let visited = remove_empty_dirs(&LocalFs, &data, 0, &mut NoProgress);
        assert_eq!(visited, 5);
        assert!(data.exists());
        assert!(!data.join("e00").exists());
        assert!(data.join("e01/d00/e0100001.au").exists());
    }

    #[test]
    fn test_clean_dir_keeps_top_and_neighbours() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("project1/e00/d00/e0000001.au"));
        touch(&root.join("project2/e00/d00/e0000002.au"));
        touch(&root.join("unrelated/file"));
        let report = clean_dir(&LocalFs, root, "project*", "", CleanFlags::default(), &mut NoProgress).unwrap();
        assert_eq!(report.failed, 0);
        assert!(root.exists());
        assert!(!root.join("project1").exists());
        assert!(!root.join("project2").exists());
        assert!(root.join("unrelated/file").exists());
    }

    #[test]
    fn test_clean_dir_top_dir_too() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project = temp_dir.path().join("project7");
        touch(&project.join("e00/d00/e0000001.au"));
        let flags = CleanFlags { top_dir_too: true, dirs_only_if_empty: true };
        clean_dir(&LocalFs, &project, "", "", flags, &mut NoProgress).unwrap();
        assert!(!project.exists());
    }

    #[test]
    fn test_enumerate_counts_unreadable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("e00/d00/e0000001.au"));
        touch(&root.join("e00/d01/e0001002.au"));
        touch(&root.join("e01/d00/e0100003.au"));
        let fs = FaultyFs::default().unreadable(|dir: &Path| dir.ends_with("e00/d01"));
        let found = enumerate(&fs, root, &EnumerateSpec::files(""), &mut NoProgress, &Cancellation::default()).unwrap();
        assert_eq!(names(root, &found.paths), vec!["e00/d00/e0000001.au", "e01/d00/e0100003.au"]);
        assert_eq!(found.skipped, 1);
    }

    #[test]
    fn test_clean_dir_reports_failures() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project = temp_dir.path().join("project3");
        touch(&project.join("e00/d00/e0000001.au"));
        touch(&project.join("e00/d00/e0000002.au"));
        let fs = FaultyFs::default().undeletable(|path: &Path| path.ends_with("e0000002.au"));
        let flags = CleanFlags { top_dir_too: true, dirs_only_if_empty: true };
        let report = clean_dir(&fs, &project, "", "", flags, &mut NoProgress).unwrap();
        assert_eq!(report.removed, 1);
        // The file plus its three non-empty ancestors.
        assert_eq!(report.failed, 4);
        assert!(project.join("e00/d00/e0000002.au").exists());
        assert!(!project.join("e00/d00/e0000001.au").exists());
    }
}
