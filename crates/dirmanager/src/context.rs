//! Process-wide state shared by every repository.
//!
//! Build one [`Context`] from loaded [`Settings`] before creating the first
//! [`Repository`](crate::Repository). Each repository attaches to it on
//! construction and detaches when closed; the last one to detach cleans the
//! temp directory.

use crate::error::{ErrorKind, Result};
use aup_config::Settings;
use aup_storage::scan::{CleanFlags, RemoveReport, clean_dir};
use aup_storage::{Filesystem, FsHandle, LocalFs, NoProgress, is_within, normalize_relative};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Top-level directories of the temp dir owned by repositories.
pub const TEMP_PROJECT_PATTERN: &str = "project*";

pub struct Context {
    settings: Settings,
    fs: FsHandle,
    dont_delete: AtomicBool,
    live: AtomicUsize,
    next_temp: AtomicU64,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("temp_dir", &self.settings.temp_dir)
            .field("fs", &self.fs.name())
            .field("live", &self.live.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(settings: Settings) -> Arc<Self> {
        Self::with_fs(settings, Arc::new(LocalFs))
    }

    pub fn with_fs(settings: Settings, fs: FsHandle) -> Arc<Self> {
        Arc::new(Self {
            settings,
            fs,
            dont_delete: AtomicBool::new(false),
            live: AtomicUsize::new(0),
            next_temp: AtomicU64::new(1),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fs(&self) -> &dyn Filesystem {
        &*self.fs
    }

    pub fn temp_dir(&self) -> &Path {
        &self.settings.temp_dir
    }

    /// Keep temp files on exit from now on, e.g. after a crash was detected.
    pub fn set_dont_delete_temp_files(&self) {
        self.dont_delete.store(true, Ordering::SeqCst);
    }

    pub fn dont_delete_temp_files(&self) -> bool {
        self.settings.keep_temp_files || self.dont_delete.load(Ordering::SeqCst)
    }

    /// Number of repositories currently attached.
    pub fn live_repositories(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Remove every `project*` directory left in the temp dir.
    pub fn clean_temp_dir(&self) -> Result<RemoveReport> {
        let temp_dir = self.temp_dir();
        if self.dont_delete_temp_files() {
            tracing::debug!(path = %temp_dir.display(), "Keeping temp files");
            return Ok(RemoveReport::default());
        }
        if !self.fs.is_dir(temp_dir) {
            return Ok(RemoveReport::default());
        }
        let report = clean_dir(self.fs(), temp_dir, TEMP_PROJECT_PATTERN, "", CleanFlags::default(), &mut NoProgress)
            .or_raise(|| ErrorKind::Storage)?;
        tracing::info!(path = %temp_dir.display(), removed = report.removed, failed = report.failed, "Cleaned temp directory");
        Ok(report)
    }

    /// Create a fresh `project<N>` directory for a new repository and count
    /// the repository as attached.
    pub(crate) fn attach(&self) -> Result<PathBuf> {
        self.fs.create_dir_all(self.temp_dir()).or_raise(|| ErrorKind::Storage)?;
        let dir = loop {
            let n = self.next_temp.fetch_add(1, Ordering::SeqCst);
            let candidate = self.temp_dir().join(format!("project{n}"));
            if !self.fs.exists(&candidate) {
                break candidate;
            }
        };
        self.fs.create_dir_all(&dir).or_raise(|| ErrorKind::Storage)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %dir.display(), "Reserved project temp directory");
        Ok(dir)
    }

    /// Attach a repository to a directory already inside the temp dir, such as
    /// the `project<N>` of a session that crashed. Returns the normalized path.
    pub(crate) fn attach_existing(&self, dir: &Path) -> Result<PathBuf> {
        let temp_dir = self.temp_dir();
        let invalid = |reason| ErrorKind::InvalidProject { path: dir.to_path_buf(), reason };
        if !is_within(temp_dir, dir) {
            exn::bail!(invalid("not inside the temp directory"));
        }
        let relative = dir.strip_prefix(temp_dir).or_raise(|| invalid("not inside the temp directory"))?;
        let dir = match normalize_relative(relative) {
            Ok(relative) => temp_dir.join(relative),
            Err(_) => exn::bail!(invalid("is the temp directory itself")),
        };
        if !self.fs.is_dir(&dir) {
            exn::bail!(invalid("not an existing directory"));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::info!(path = %dir.display(), "Attached to existing temp directory");
        Ok(dir)
    }

    /// Returns `true` if this was the last attached repository.
    pub(crate) fn detach(&self) -> bool {
        self.live.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settings;

    #[test]
    fn test_attach_reserves_distinct_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("project1")).unwrap();
        let ctx = Context::new(settings(temp_dir.path()));
        let first = ctx.attach().unwrap();
        let second = ctx.attach().unwrap();
        assert_eq!(first, temp_dir.path().join("project2"));
        assert_eq!(second, temp_dir.path().join("project3"));
        assert!(second.is_dir());
        assert_eq!(ctx.live_repositories(), 2);
        assert!(!ctx.detach());
        assert!(ctx.detach());
    }

    #[test]
    fn test_attach_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("project7")).unwrap();
        let ctx = Context::new(settings(temp_dir.path()));
        let dir = ctx.attach_existing(&temp_dir.path().join("project7/e00/..")).unwrap();
        assert_eq!(dir, temp_dir.path().join("project7"));
        assert_eq!(ctx.live_repositories(), 1);

        let outside = tempfile::tempdir().unwrap();
        for bad in [outside.path(), temp_dir.path(), &temp_dir.path().join("project8"), &temp_dir.path().join("../x")] {
            let err = ctx.attach_existing(bad).unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidProject { .. }), "{}", bad.display());
        }
        assert_eq!(ctx.live_repositories(), 1);
    }

    #[test]
    fn test_clean_temp_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stale = temp_dir.path().join("project7/e00/d00");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("e0000001.au"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("unrelated.txt"), b"x").unwrap();
        std::fs::create_dir(temp_dir.path().join("other")).unwrap();

        let ctx = Context::new(settings(temp_dir.path()));
        ctx.clean_temp_dir().unwrap();
        assert!(!temp_dir.path().join("project7").exists());
        assert!(temp_dir.path().join("unrelated.txt").exists());
        assert!(temp_dir.path().join("other").exists());
    }

    #[test]
    fn test_dont_delete_flag() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("project7")).unwrap();
        let ctx = Context::new(settings(temp_dir.path()));
        ctx.set_dont_delete_temp_files();
        assert!(ctx.dont_delete_temp_files());
        assert_eq!(ctx.clean_temp_dir().unwrap(), RemoveReport::default());
        assert!(temp_dir.path().join("project7").exists());

        let keep = Settings { keep_temp_files: true, ..settings(temp_dir.path()) };
        assert!(Context::new(keep).dont_delete_temp_files());
    }
}
