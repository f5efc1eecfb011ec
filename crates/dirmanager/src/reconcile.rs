//! Checks between the catalog and what is actually on disk.
//!
//! The `find_*` scans only read; they hold the shared lock and can be
//! cancelled between blocks. Removing orphans is the one mutating pass.

use crate::catalog::BlockId;
use crate::error::{ErrorKind, Result};
use crate::repository::{Repository, State};
use aup_blockfile::name::{DATA_EXT, SUMMARY_EXT};
use aup_blockfile::{BlockFile, BlockName};
use aup_storage::scan::{EnumerateSpec, enumerate, remove_empty_dirs};
use aup_storage::{Cancellation, NoProgress, Progress, is_within};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A block whose file is not where the catalog says it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub id: BlockId,
    pub name: Option<BlockName>,
    pub path: PathBuf,
}

fn is_block_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext == DATA_EXT || ext == SUMMARY_EXT)
}

impl Repository {
    fn find_missing(
        &self,
        cancel: &Cancellation,
        file_of: impl Fn(&BlockFile) -> Option<&Path>,
        is_gone: impl Fn(&Path) -> bool,
    ) -> Result<Vec<MissingFile>> {
        let state = self.read();
        let mut missing = Vec::new();
        for (id, block) in state.catalog.iter() {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let Some(path) = file_of(block.as_ref()) else {
                continue;
            };
            if is_gone(path) {
                missing.push(MissingFile { id, name: block.name().cloned(), path: path.to_path_buf() });
            }
        }
        missing.sort_by(|a, b| a.path.cmp(&b.path).then(a.id.cmp(&b.id)));
        Ok(missing)
    }

    /// Alias blocks whose external file is gone. Each distinct target is
    /// checked once, however many blocks share it.
    pub fn find_missing_alias_files(&self, cancel: &Cancellation) -> Result<Vec<MissingFile>> {
        let fs = self.fs();
        let gone: HashSet<PathBuf> = self.aliased_files().into_iter().filter(|target| !fs.exists(target)).collect();
        if gone.is_empty() {
            return Ok(Vec::new());
        }
        self.find_missing(cancel, BlockFile::alias_target, |target| gone.contains(target))
    }

    /// Alias blocks whose `.auf` descriptor is gone.
    pub fn find_missing_aufs(&self, cancel: &Cancellation) -> Result<Vec<MissingFile>> {
        let fs = self.fs();
        self.find_missing(cancel, BlockFile::summary_file, |path| !fs.exists(path))
    }

    /// Simple blocks whose `.au` data file is gone.
    pub fn find_missing_aus(&self, cancel: &Cancellation) -> Result<Vec<MissingFile>> {
        let fs = self.fs();
        self.find_missing(cancel, BlockFile::data_file, |path| !fs.exists(path))
    }

    /// Block files among `paths` that no catalog record owns at exactly that
    /// location. Files of known blocks sitting in the wrong directory count
    /// as orphans too.
    pub fn find_orphan_block_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let state = self.read();
        orphans(&state, paths)
    }

    /// Enumerate the data directory and report its orphans, sorted.
    pub fn scan_orphan_block_files(&self, progress: &mut dyn Progress, cancel: &Cancellation) -> Result<Vec<PathBuf>> {
        let data_dir = self.data_dir();
        if !self.fs().is_dir(&data_dir) {
            return Ok(Vec::new());
        }
        let found = enumerate(self.fs(), &data_dir, &EnumerateSpec::files(""), progress, cancel).map_err(|err| {
            let kind = match &*err {
                aup_storage::error::ErrorKind::Cancelled => ErrorKind::Cancelled,
                _ => ErrorKind::Storage,
            };
            err.raise(kind)
        })?;
        if found.skipped > 0 {
            tracing::warn!(skipped = found.skipped, "Some entries could not be scanned");
        }
        Ok(self.find_orphan_block_files(&found.paths))
    }

    /// Delete the given orphans, release their names and prune directories
    /// left empty. Paths outside the data directory, or that are no longer
    /// orphans, are skipped. Returns the number of files deleted.
    pub fn remove_orphan_block_files(&self, paths: &[PathBuf]) -> Result<usize> {
        let fs = self.fs();
        let mut state = self.write();
        let data_dir = state.data_dir(self.temp_dir()).to_path_buf();
        let mut removed = 0;
        for path in orphans(&state, paths) {
            if !is_within(&data_dir, &path) {
                tracing::warn!(path = %path.display(), "Refusing to delete a file outside the data directory");
                continue;
            }
            match fs.remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.is_not_found() => {},
                Err(err) => return Err(err.raise(ErrorKind::Storage)),
            }
            let name = path.file_name().and_then(|n| n.to_str()).and_then(|n| BlockName::from_file_name(n).ok());
            if let Some((name, _)) = name {
                if name.placement_matches(&path) && !state.catalog.contains_name(&name) {
                    state.allocator.release(fs, &name, &data_dir);
                }
            }
        }
        drop(state);
        if fs.is_dir(&data_dir) {
            remove_empty_dirs(fs, &data_dir, 0, &mut NoProgress);
        }
        tracing::info!(removed, path = %data_dir.display(), "Removed orphan block files");
        Ok(removed)
    }
}

/// Every file some record in the catalog owns.
pub(crate) fn owned_files(state: &State) -> HashSet<PathBuf> {
    state.catalog.iter().flat_map(|(_, block)| block.files().into_iter().map(Path::to_path_buf)).collect()
}

fn orphans(state: &State, paths: &[PathBuf]) -> Vec<PathBuf> {
    let owned = owned_files(state);
    let mut orphans: Vec<PathBuf> =
        paths.iter().filter(|path| is_block_file(path) && !owned.contains(*path)).cloned().collect();
    orphans.sort();
    orphans.dedup();
    orphans
}
