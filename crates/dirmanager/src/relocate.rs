//! All-or-nothing movement of block files between data directories.
//!
//! Files are hard linked where the volume allows it and copied otherwise. The
//! sources are never touched: deciding whether to delete them afterwards is up
//! to the caller. If any item fails, or the caller cancels, every file and
//! directory created so far is removed again, deepest first.

use crate::error::{ErrorKind, Result};
use aup_storage::error::ErrorKind as StorageErrorKind;
use aup_storage::{Cancellation, Filesystem, Progress, keep_going};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationItem {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl RelocationItem {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

/// How a successful relocation placed its files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub linked: usize,
    pub copied: usize,
}

impl Relocation {
    pub fn total(&self) -> usize {
        self.linked + self.copied
    }
}

/// Everything created so far, in creation order.
#[derive(Debug, Default)]
struct Journal {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Journal {
    fn roll_back(self, fs: &dyn Filesystem) {
        tracing::warn!(files = self.files.len(), dirs = self.dirs.len(), "Rolling back relocation");
        for file in self.files.iter().rev() {
            if let Err(err) = fs.remove_file(file) {
                tracing::warn!(path = %file.display(), error = %err, "Could not remove relocated file");
            }
        }
        for dir in self.dirs.iter().rev() {
            if let Err(err) = fs.remove_dir(dir) {
                tracing::warn!(path = %dir.display(), error = %err, "Could not remove relocation directory");
            }
        }
    }
}

pub struct Relocator<'a> {
    fs: &'a dyn Filesystem,
    prefer_link: bool,
    verify: bool,
}

impl<'a> Relocator<'a> {
    pub fn new(fs: &'a dyn Filesystem, prefer_link: bool, verify: bool) -> Self {
        Self { fs, prefer_link, verify }
    }

    /// Place a copy of every `from` at its `to`.
    ///
    /// Destinations must not exist yet. Progress is reported once per item.
    pub fn relocate(
        &self,
        items: &[RelocationItem],
        progress: &mut dyn Progress,
        cancel: &Cancellation,
    ) -> Result<Relocation> {
        let total = items.len() as u64;
        let mut journal = Journal::default();
        let mut outcome = Relocation::default();
        let mut link = self.prefer_link;

        for (done, item) in items.iter().enumerate() {
            if !keep_going(progress, cancel, done as u64, total) {
                journal.roll_back(self.fs);
                exn::bail!(ErrorKind::Cancelled);
            }
            match self.transfer(item, &mut link, &mut journal) {
                Ok(true) => outcome.linked += 1,
                Ok(false) => outcome.copied += 1,
                Err(err) => {
                    tracing::warn!(from = %item.from.display(), to = %item.to.display(), error = %err, "Relocation failed");
                    journal.roll_back(self.fs);
                    return Err(err.raise(ErrorKind::Relocation(item.to.clone())));
                },
            }
        }
        progress.update(total, total);
        tracing::debug!(linked = outcome.linked, copied = outcome.copied, "Relocated block files");
        Ok(outcome)
    }

    /// Returns `true` if the file was linked rather than copied.
    fn transfer(&self, item: &RelocationItem, link: &mut bool, journal: &mut Journal) -> aup_storage::error::Result<bool> {
        if let Some(parent) = item.to.parent() {
            self.ensure_dir(parent, journal)?;
        }
        if self.fs.exists(&item.to) {
            return Err(exn::Exn::from(StorageErrorKind::AlreadyExists(item.to.clone())));
        }
        if *link {
            match self.fs.hard_link(&item.from, &item.to) {
                Ok(()) => {
                    journal.files.push(item.to.clone());
                    return Ok(true);
                },
                Err(err) => {
                    tracing::info!(error = %err, "Hard links unavailable, copying instead");
                    *link = false;
                },
            }
        }
        self.fs.copy(&item.from, &item.to)?;
        journal.files.push(item.to.clone());
        if self.verify && self.fs.checksum(&item.from)? != self.fs.checksum(&item.to)? {
            return Err(exn::Exn::from(StorageErrorKind::VerifyFailed(item.to.clone())));
        }
        Ok(false)
    }

    /// Create `dir` and any missing parents, journaling each one created.
    fn ensure_dir(&self, dir: &Path, journal: &mut Journal) -> aup_storage::error::Result<()> {
        let missing: Vec<&Path> = dir.ancestors().take_while(|d| !self.fs.exists(d)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.fs.create_dir_all(dir)?;
        journal.dirs.extend(missing.into_iter().rev().map(Path::to_path_buf));
        Ok(())
    }
}
