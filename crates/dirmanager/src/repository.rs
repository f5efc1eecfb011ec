//! The block repository: every block a project uses, how many references
//! each one has, and where its files live.
//!
//! Until a project is saved, blocks are written below a private
//! `project<N>` directory inside the temp dir. Afterwards they live in the
//! project's `<name>_data` directory.

use crate::balance::NameAllocator;
use crate::catalog::{BlockId, Catalog};
use crate::context::Context;
use crate::error::{ErrorKind, Result};
use aup_blockfile::name::{DATA_EXT, SUMMARY_EXT};
use aup_blockfile::{BlockFile, BlockTarget, SampleFormat};
use aup_storage::scan::{CleanFlags, EnumerateSpec, clean_dir, enumerate};
use aup_storage::{Cancellation, Filesystem, NoProgress};
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One counted reference to a block.
///
/// Not `Clone`: further references come from
/// [`copy_block_file`](Repository::copy_block_file) or
/// [`reference`](Repository::reference), and every one is handed back through
/// [`release`](Repository::release).
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct BlockRef {
    id: BlockId,
}

impl BlockRef {
    pub(crate) fn new(id: BlockId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Project {
    pub path: PathBuf,
    pub name: String,
    pub data_dir: PathBuf,
}

#[derive(Debug)]
pub(crate) struct State {
    pub project: Option<Project>,
    pub catalog: Catalog,
    /// External files referenced by alias blocks, with a count of blocks
    /// using each.
    pub alias_list: BTreeMap<PathBuf, usize>,
    pub allocator: NameAllocator,
}

impl State {
    pub fn data_dir<'a>(&'a self, temp: &'a Path) -> &'a Path {
        self.project.as_ref().map_or(temp, |project| project.data_dir.as_path())
    }

    /// Insert with one reference.
    pub fn adopt(&mut self, block: BlockFile) -> BlockId {
        if let Some(target) = block.alias_target() {
            *self.alias_list.entry(target.to_path_buf()).or_default() += 1;
        }
        self.catalog.insert(block)
    }

    fn forget_alias(&mut self, block: &BlockFile) {
        let Some(target) = block.alias_target() else {
            return;
        };
        let remaining = match self.alias_list.get_mut(target) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            },
            None => return,
        };
        if remaining == 0 {
            self.alias_list.remove(target);
        }
    }
}

pub struct Repository {
    ctx: Arc<Context>,
    temp: PathBuf,
    state: RwLock<State>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("temp", &self.temp).field("data_dir", &self.data_dir()).finish()
    }
}

impl Repository {
    /// Attach a new, empty repository to `ctx`.
    pub fn new(ctx: Arc<Context>) -> Result<Self> {
        let temp = ctx.attach()?;
        Ok(Self::attached(ctx, temp))
    }

    /// Attach to a temp directory left behind by an earlier session so its
    /// blocks can be loaded again. `dir` must be below the context's temp dir.
    ///
    /// The catalog starts empty; names of every block file already in `dir`
    /// are reserved, so new blocks never overwrite them.
    pub fn with_temp_dir(ctx: Arc<Context>, dir: &Path) -> Result<Self> {
        let temp = ctx.attach_existing(dir)?;
        let repo = Self::attached(ctx, temp);
        match enumerate(repo.fs(), &repo.temp, &EnumerateSpec::files(""), &mut NoProgress, &Cancellation::default()) {
            Ok(found) => {
                let reserved = repo.write().allocator.rebuild(found.paths.iter().map(PathBuf::as_path));
                tracing::debug!(path = %repo.temp.display(), reserved, "Recovered temp directory");
            },
            Err(err) => tracing::warn!(path = %repo.temp.display(), error = %err, "Could not scan recovered temp directory"),
        }
        Ok(repo)
    }

    fn attached(ctx: Arc<Context>, temp: PathBuf) -> Self {
        let settings = ctx.settings();
        let state = State {
            project: None,
            catalog: Catalog::default(),
            alias_list: BTreeMap::new(),
            allocator: NameAllocator::new(settings.balance, settings.name_seed),
        };
        Self { ctx, temp, state: RwLock::new(state), closed: AtomicBool::new(false) }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn fs(&self) -> &dyn Filesystem {
        self.ctx.fs()
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// This repository's private directory below the temp dir.
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    /// Where new block files are written.
    pub fn data_dir(&self) -> PathBuf {
        self.read().data_dir(&self.temp).to_path_buf()
    }

    pub fn project_name(&self) -> Option<String> {
        self.read().project.as_ref().map(|p| p.name.clone())
    }

    pub fn project_path(&self) -> Option<PathBuf> {
        self.read().project.as_ref().map(|p| p.path.clone())
    }

    /// Blocks with at least one reference.
    pub fn num_block_files(&self) -> usize {
        self.read().catalog.live_len()
    }

    /// External files referenced by alias blocks.
    pub fn aliased_files(&self) -> Vec<PathBuf> {
        self.read().alias_list.keys().cloned().collect()
    }

    /// Bytes available on the volume holding the data directory.
    pub fn free_disk_space(&self) -> Result<u64> {
        let data_dir = self.data_dir();
        let fs = self.fs();
        let existing = data_dir.ancestors().find(|dir| fs.is_dir(dir)).unwrap_or(data_dir.as_path());
        fs.available_space(existing).or_raise(|| ErrorKind::Storage)
    }

    pub fn contains(&self, block: &BlockRef) -> bool {
        self.read().catalog.refs(block.id).is_some_and(|refs| refs > 0)
    }

    /// Whether any block in the catalog owns the file at `path`.
    pub fn contains_path(&self, path: &Path) -> bool {
        self.read().catalog.iter().any(|(_, block)| block.files().contains(&path))
    }

    pub fn get(&self, id: BlockId) -> Result<Arc<BlockFile>> {
        self.read().catalog.get(id).cloned().ok_or_raise(|| ErrorKind::UnknownBlock(id))
    }

    /// Create a block under a freshly allocated name.
    ///
    /// `factory` writes the block's files for the given target. If it fails,
    /// any partial file is removed, the name is released and nothing is added
    /// to the catalog.
    pub fn new_block_file<F>(&self, factory: F) -> Result<BlockRef>
    where
        F: FnOnce(&dyn Filesystem, &BlockTarget) -> aup_blockfile::error::Result<BlockFile>,
    {
        let mut state = self.write();
        let id = self.create_with(&mut state, factory)?;
        tracing::debug!(%id, "Created block file");
        Ok(BlockRef::new(id))
    }

    pub fn new_simple_block(&self, samples: &[f32], format: SampleFormat) -> Result<BlockRef> {
        self.new_block_file(|fs, target| BlockFile::write_simple(fs, target, samples, format))
    }

    pub fn new_alias_block(&self, wav: &Path, start: u64, len: u64, channel: u16) -> Result<BlockRef> {
        self.new_block_file(|fs, target| BlockFile::alias(fs, target, wav, start, len, channel))
    }

    pub fn new_silent_block(&self, len: u64) -> BlockRef {
        BlockRef::new(self.write().adopt(BlockFile::silent(len)))
    }

    fn create_with<F>(&self, state: &mut State, factory: F) -> Result<BlockId>
    where
        F: FnOnce(&dyn Filesystem, &BlockTarget) -> aup_blockfile::error::Result<BlockFile>,
    {
        let fs = self.fs();
        let data_dir = state.data_dir(&self.temp).to_path_buf();
        let State { catalog, allocator, .. } = &mut *state;
        let (name, _) = allocator.allocate(fs, &data_dir, |name| catalog.contains_name(name))?;
        let target = BlockTarget::new(name, &data_dir);
        match factory(fs, &target) {
            Ok(block) => {
                if block.name() != Some(&target.name) {
                    allocator.release(fs, &target.name, &data_dir);
                }
                Ok(state.adopt(block))
            },
            Err(err) => {
                for ext in [DATA_EXT, SUMMARY_EXT] {
                    let partial = target.path(ext);
                    match fs.remove_file(&partial) {
                        Ok(()) => tracing::debug!(path = %partial.display(), "Removed partial block file"),
                        Err(e) if e.is_not_found() => {},
                        Err(e) => tracing::warn!(path = %partial.display(), error = %e, "Could not remove partial block file"),
                    }
                }
                allocator.release(fs, &target.name, &data_dir);
                Err(err.raise(ErrorKind::Block))
            },
        }
    }

    /// Another reference to the same content.
    ///
    /// Unlocked blocks just gain a reference. A locked block belongs to a saved
    /// project and must not change underneath it, so its file is duplicated
    /// under a new name instead.
    pub fn copy_block_file(&self, block: &BlockRef) -> Result<BlockRef> {
        let mut state = self.write();
        let source = state.catalog.get(block.id).cloned().ok_or_raise(|| ErrorKind::UnknownBlock(block.id))?;
        if !source.is_locked() {
            state.catalog.add_ref(block.id);
            return Ok(BlockRef::new(block.id));
        }
        let id = if source.is_silent() {
            state.adopt(BlockFile::silent(source.len()))
        } else {
            self.create_with(&mut state, |fs, target| source.duplicate(fs, target))?
        };
        tracing::debug!(from = %block.id, to = %id, "Copied locked block");
        Ok(BlockRef::new(id))
    }

    /// Take a new reference to a block by id, bringing it back from the
    /// garbage set if needed (e.g. when undo history restores it).
    pub fn reference(&self, id: BlockId) -> Result<BlockRef> {
        self.write().catalog.add_ref(id).ok_or_raise(|| ErrorKind::UnknownBlock(id))?;
        Ok(BlockRef::new(id))
    }

    /// Give a reference back. At zero references the block becomes garbage
    /// until the next [`collect_garbage`](Self::collect_garbage).
    pub fn release(&self, block: BlockRef) -> Result<()> {
        let refs = self.write().catalog.release(block.id).ok_or_raise(|| ErrorKind::UnknownBlock(block.id))?;
        if refs == 0 {
            tracing::debug!(id = %block.id, "Block has no references left");
        }
        Ok(())
    }

    /// Drop every block without references and delete its files.
    ///
    /// Locked blocks are dropped from the catalog but their files stay on
    /// disk, since the saved project still names them. Returns the number of
    /// records dropped.
    pub fn collect_garbage(&self) -> usize {
        let fs = self.fs();
        let mut state = self.write();
        let data_dir = state.data_dir(&self.temp).to_path_buf();
        let mut collected = 0;
        for id in state.catalog.garbage() {
            let Some(block) = state.catalog.remove(id) else {
                continue;
            };
            collected += 1;
            state.forget_alias(&block);
            if block.is_locked() {
                tracing::debug!(%id, "Dropped locked block, keeping its files");
                continue;
            }
            for file in block.files() {
                match fs.remove_file(file) {
                    Ok(()) => {},
                    Err(err) if err.is_not_found() => {},
                    Err(err) => tracing::warn!(path = %file.display(), error = %err, "Could not delete block file"),
                }
            }
            if let Some(name) = block.name() {
                state.allocator.release(fs, name, &data_dir);
            }
        }
        if collected > 0 {
            tracing::debug!(collected, "Collected unreferenced blocks");
        }
        collected
    }

    pub fn lock(&self, id: BlockId) -> Result<()> {
        self.get(id)?.lock();
        Ok(())
    }

    pub fn unlock(&self, id: BlockId) -> Result<()> {
        self.get(id)?.unlock();
        Ok(())
    }

    pub fn lock_all(&self) {
        for (_, block) in self.read().catalog.iter() {
            block.lock();
        }
    }

    pub fn unlock_all(&self) {
        for (_, block) in self.read().catalog.iter() {
            block.unlock();
        }
    }

    /// Read `count` samples of a block. The repository lock is not held while
    /// reading.
    pub fn read_data(&self, id: BlockId, start: u64, count: usize) -> Result<Vec<f32>> {
        let block = self.get(id)?;
        block.read_data(self.fs(), start, count).or_raise(|| ErrorKind::Block)
    }

    /// Collect garbage and tidy up the temp directory. Called by `Drop` if not
    /// called explicitly; only the first call does anything.
    ///
    /// A project that was never saved has its temp files deleted unless the
    /// context says to keep them. The last repository of a context also cleans
    /// the whole temp dir.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.collect_garbage();
        let unsaved = self.read().project.is_none();
        let purged = if self.ctx.dont_delete_temp_files() { Ok(()) } else { self.purge_temp(unsaved) };
        let last = self.ctx.detach();
        purged?;
        if last {
            self.ctx.clean_temp_dir()?;
        }
        tracing::debug!(temp = %self.temp.display(), "Closed repository");
        Ok(())
    }

    fn purge_temp(&self, unsaved: bool) -> Result<()> {
        if !unsaved {
            // Normally emptied when the project was first saved.
            if self.fs().remove_dir(&self.temp).is_ok() {
                tracing::debug!(path = %self.temp.display(), "Removed empty temp directory");
            }
            return Ok(());
        }
        let flags = CleanFlags { top_dir_too: true, dirs_only_if_empty: false };
        let report = clean_dir(self.fs(), &self.temp, "", "", flags, &mut NoProgress).or_raise(|| ErrorKind::Storage)?;
        tracing::info!(path = %self.temp.display(), removed = report.removed, "Discarded unsaved project files");
        Ok(())
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "Could not close repository cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_files, repository, samples};
    use aup_blockfile::{Attributes, BlockName, Registry, SIMPLE_TAG};
    use aup_config::Balance;
    use aup_storage::{FaultyFs, LocalFs};
    use std::collections::HashSet;

    #[test]
    fn test_new_blocks_live_in_temp() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(64), SampleFormat::Float).unwrap();
        let file = repo.get(block.id()).unwrap().data_file().unwrap().to_path_buf();
        assert!(file.starts_with(repo.temp_dir()));
        assert!(file.is_file());
        assert!(repo.contains(&block));
        assert!(repo.contains_path(&file));
        assert_eq!(repo.num_block_files(), 1);
        assert_eq!(repo.read_data(block.id(), 0, 64).unwrap(), samples(64));
        assert!(repo.project_name().is_none());
        assert!(repo.free_disk_space().unwrap() > 0);
    }

    #[test]
    fn test_names_are_distinct_and_buckets_bounded() {
        let (_temp_dir, repo) = repository(Balance { top_capacity: 4, mid_capacity: 8 });
        let mut names = HashSet::new();
        for _ in 0..100 {
            let block = repo.new_simple_block(&samples(4), SampleFormat::Int16).unwrap();
            assert!(names.insert(repo.get(block.id()).unwrap().name().unwrap().clone()));
        }
        for entry in walkdir::WalkDir::new(repo.temp_dir()).min_depth(2).max_depth(2) {
            let entry = entry.unwrap();
            assert!(std::fs::read_dir(entry.path()).unwrap().count() <= 8);
        }
    }

    #[test]
    fn test_two_thousand_blocks_fit_one_top_bucket() {
        let (_temp_dir, repo) = repository(Balance { top_capacity: 256, mid_capacity: 1024 });
        for _ in 0..2000 {
            let _block = repo.new_simple_block(&[0.25; 4], SampleFormat::Int16).unwrap();
        }
        let tops: Vec<_> = std::fs::read_dir(repo.temp_dir()).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(tops, vec![repo.temp_dir().join("e00")]);
        let mut total = 0;
        for mid in std::fs::read_dir(&tops[0]).unwrap() {
            let files = std::fs::read_dir(mid.unwrap().path()).unwrap().count();
            assert!(files <= 1024);
            total += files;
        }
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_failed_factory_leaves_nothing() {
        let (_temp_dir, repo) = repository(Balance::default());
        let err = repo
            .new_block_file(|fs, target| {
                fs.write(&target.path(DATA_EXT), b"half a block").unwrap();
                Err(exn::Exn::from(aup_blockfile::error::ErrorKind::Write))
            })
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Block));
        assert_eq!(repo.num_block_files(), 0);
        assert_eq!(block_files(repo.temp_dir()), 0);
        assert!(repo.read().allocator.is_empty());
    }

    #[test]
    fn test_recover_crashed_temp_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let crashed = temp_dir.path().join("project7");
        let name = BlockName::managed(0, 0, 1);
        std::fs::create_dir_all(name.dir(&crashed)).unwrap();
        BlockFile::write_simple(&LocalFs, &BlockTarget::new(name.clone(), &crashed), &samples(32), SampleFormat::Float)
            .unwrap();

        let ctx = Context::new(crate::testing::settings(temp_dir.path()));
        let repo = Repository::with_temp_dir(ctx.clone(), &crashed).unwrap();
        assert_eq!(repo.temp_dir(), crashed.as_path());
        assert_eq!(repo.read().allocator.len(), 1);
        assert_eq!(ctx.live_repositories(), 1);

        let attrs = Attributes::new().with("filename", "e0000001.au").with("len", 32);
        let (block, warning) = repo.load_block_file(Registry::builtin(), SIMPLE_TAG, &attrs, &repo.load_options());
        assert!(warning.is_none());
        assert_eq!(repo.read_data(block.id(), 0, 32).unwrap(), samples(32));

        for _ in 0..16 {
            let fresh = repo.new_simple_block(&samples(4), SampleFormat::Float).unwrap();
            assert_ne!(repo.get(fresh.id()).unwrap().name(), Some(&name));
        }
        assert_eq!(repo.read_data(block.id(), 0, 32).unwrap(), samples(32));
    }

    #[test]
    fn test_recover_rejects_dirs_outside_temp() {
        let temp_dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let ctx = Context::new(crate::testing::settings(temp_dir.path()));
        let err = Repository::with_temp_dir(ctx.clone(), elsewhere.path()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidProject { .. }));
        assert_eq!(ctx.live_repositories(), 0);
    }

    #[test]
    fn test_disk_full_reverts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FaultyFs::default().fill_disk_after(2));
        let ctx = Context::with_fs(crate::testing::settings(temp_dir.path()), fs);
        let repo = Repository::new(ctx).unwrap();
        let _first = repo.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        let _second = repo.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        assert!(repo.new_simple_block(&samples(8), SampleFormat::Float).is_err());
        assert_eq!(repo.num_block_files(), 2);
        assert_eq!(block_files(repo.temp_dir()), 2);
        assert_eq!(repo.read().allocator.len(), 2);
    }

    #[test]
    fn test_copy_unlocked_shares_file() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(16), SampleFormat::Float).unwrap();
        let copy = repo.copy_block_file(&block).unwrap();
        assert_eq!(copy.id(), block.id());
        assert_eq!(block_files(repo.temp_dir()), 1);
        assert_eq!(repo.num_block_files(), 1);
    }

    #[test]
    fn test_copy_locked_duplicates_file() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(16), SampleFormat::Int24).unwrap();
        repo.lock(block.id()).unwrap();
        let copy = repo.copy_block_file(&block).unwrap();
        assert_ne!(copy.id(), block.id());
        assert_eq!(block_files(repo.temp_dir()), 2);
        assert!(!repo.get(copy.id()).unwrap().is_locked());
        assert_eq!(repo.read_data(copy.id(), 0, 16).unwrap(), repo.read_data(block.id(), 0, 16).unwrap());
        assert_eq!(repo.get(copy.id()).unwrap().format(), SampleFormat::Int24);
    }

    #[test]
    fn test_copy_locked_failure_changes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FaultyFs::default().fail_transfers_to(|_| true));
        let ctx = Context::with_fs(crate::testing::settings(temp_dir.path()), fs);
        let repo = Repository::new(ctx).unwrap();
        let block = repo.new_simple_block(&samples(16), SampleFormat::Float).unwrap();
        repo.lock_all();
        assert!(repo.copy_block_file(&block).is_err());
        assert_eq!(repo.num_block_files(), 1);
        assert_eq!(repo.read().allocator.len(), 1);
        assert_eq!(block_files(repo.temp_dir()), 1);
    }

    #[test]
    fn test_last_reference_deletes_on_collection() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(16), SampleFormat::Float).unwrap();
        let sibling = repo.copy_block_file(&block).unwrap();
        let id = block.id();

        repo.release(block).unwrap();
        assert_eq!(repo.collect_garbage(), 0);
        assert_eq!(block_files(repo.temp_dir()), 1);
        assert_eq!(repo.read_data(sibling.id(), 0, 16).unwrap(), samples(16));

        repo.release(sibling).unwrap();
        assert_eq!(block_files(repo.temp_dir()), 1);
        assert_eq!(repo.collect_garbage(), 1);
        assert_eq!(block_files(repo.temp_dir()), 0);
        assert!(repo.get(id).is_err());
        assert!(repo.read().allocator.is_empty());
    }

    #[test]
    fn test_reference_resurrects_garbage() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(16), SampleFormat::Float).unwrap();
        let id = block.id();
        repo.release(block).unwrap();
        assert_eq!(repo.num_block_files(), 0);
        let restored = repo.reference(id).unwrap();
        assert_eq!(repo.collect_garbage(), 0);
        assert_eq!(repo.read_data(restored.id(), 0, 16).unwrap(), samples(16));
    }

    #[test]
    fn test_locked_garbage_keeps_file() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(16), SampleFormat::Float).unwrap();
        repo.lock(block.id()).unwrap();
        repo.release(block).unwrap();
        assert_eq!(repo.collect_garbage(), 1);
        assert_eq!(block_files(repo.temp_dir()), 1);
        assert_eq!(repo.read().allocator.len(), 1);
    }

    #[test]
    fn test_silent_blocks_have_no_files() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_silent_block(100);
        repo.lock(block.id()).unwrap();
        let copy = repo.copy_block_file(&block).unwrap();
        assert_ne!(copy.id(), block.id());
        assert_eq!(repo.read_data(copy.id(), 10, 5).unwrap(), vec![0.0; 5]);
        assert_eq!(block_files(repo.temp_dir()), 0);
    }

    #[test]
    fn test_unknown_block() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_silent_block(1);
        let id = block.id();
        repo.release(block).unwrap();
        repo.collect_garbage();
        assert!(matches!(&*repo.reference(id).unwrap_err(), ErrorKind::UnknownBlock(missing) if *missing == id));
        assert!(repo.lock(id).is_err());
    }

    #[test]
    fn test_close_discards_unsaved_project() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(crate::testing::settings(temp_dir.path()));
        let first = Repository::new(Arc::clone(&ctx)).unwrap();
        let second = Repository::new(Arc::clone(&ctx)).unwrap();
        let _block = first.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        let _other = second.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        std::fs::create_dir(temp_dir.path().join("project99")).unwrap();

        first.close().unwrap();
        assert!(!first.temp_dir().exists());
        assert!(second.temp_dir().exists());
        assert!(temp_dir.path().join("project99").exists());

        drop(second);
        assert_eq!(ctx.live_repositories(), 0);
        assert!(!temp_dir.path().join("project99").exists());
    }

    #[test]
    fn test_close_keeps_files_when_asked() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(crate::testing::settings(temp_dir.path()));
        let repo = Repository::new(Arc::clone(&ctx)).unwrap();
        let _block = repo.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        ctx.set_dont_delete_temp_files();
        repo.close().unwrap();
        repo.close().unwrap();
        assert_eq!(block_files(repo.temp_dir()), 1);
        assert_eq!(ctx.live_repositories(), 0);
    }
}
