//! Failure-injecting filesystem for testing.

use crate::error::{ErrorKind, Result};
use crate::fs::{DirEntry, Filesystem, LocalFs};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Predicate = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// Wraps another [`Filesystem`] and fails selected operations.
///
/// Ideal for exercising rollback paths: a relocation that hits a failing
/// destination halfway through, a volume that can't hard link, or a disk that
/// fills up after `n` writes. Scans and cleanup can be made to hit unreadable
/// directories and undeletable entries.
///
/// # Examples
///
/// ```ignore
/// use aup_storage::{FaultyFs, Filesystem};
/// use std::path::Path;
///
/// let fs = FaultyFs::default()
///     .without_hard_links()
///     .fail_transfers_to(|to: &Path| to.ends_with("e0000abc.au"));
/// assert!(fs.hard_link(Path::new("/a"), Path::new("/b")).is_err());
/// ```
pub struct FaultyFs {
    inner: Box<dyn Filesystem>,
    no_links: AtomicBool,
    fail_transfer: Mutex<Option<Predicate>>,
    unreadable: Mutex<Option<Predicate>>,
    undeletable: Mutex<Option<Predicate>>,
    writes_left: Mutex<Option<usize>>,
    transfers: AtomicUsize,
}

impl FaultyFs {
    pub fn new(inner: impl Filesystem + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            no_links: AtomicBool::new(false),
            fail_transfer: Mutex::new(None),
            unreadable: Mutex::new(None),
            undeletable: Mutex::new(None),
            writes_left: Mutex::new(None),
            transfers: AtomicUsize::new(0),
        }
    }

    /// Every hard link attempt fails, as if source and destination were on
    /// different volumes.
    pub fn without_hard_links(self) -> Self {
        self.no_links.store(true, Ordering::SeqCst);
        self
    }

    /// Hard links and copies whose destination matches `predicate` fail.
    pub fn fail_transfers_to(self, predicate: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        *self.fail_transfer.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(predicate));
        self
    }

    /// Reading a file or listing a directory matching `predicate` fails.
    pub fn unreadable(self, predicate: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        *self.unreadable.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(predicate));
        self
    }

    /// Removing a file or directory matching `predicate` fails.
    pub fn undeletable(self, predicate: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        *self.undeletable.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(predicate));
        self
    }

    /// Allow `n` more writes/copies, then report a full disk.
    pub fn fill_disk_after(self, n: usize) -> Self {
        *self.writes_left.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
        self
    }

    /// Number of successful hard links and copies so far.
    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    fn check(slot: &Mutex<Option<Predicate>>, path: &Path) -> Result<()> {
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|predicate| predicate(path)) {
            exn::bail!(ErrorKind::Injected(path.to_path_buf()));
        }
        Ok(())
    }

    fn spend_write(&self, path: &Path) -> Result<()> {
        let mut guard = self.writes_left.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(0) => exn::bail!(ErrorKind::StorageFull(path.to_path_buf())),
            Some(left) => *left -= 1,
            None => {},
        }
        Ok(())
    }
}
impl Default for FaultyFs {
    fn default() -> Self {
        Self::new(LocalFs)
    }
}

impl Filesystem for FaultyFs {
    fn name(&self) -> &str {
        "faulty"
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn is_read_only(&self, path: &Path) -> Result<bool> {
        self.inner.is_read_only(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        Self::check(&self.undeletable, path)?;
        self.inner.remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        Self::check(&self.undeletable, path)?;
        self.inner.remove_dir_all(path)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        Self::check(&self.unreadable, dir)?;
        self.inner.read_dir(dir)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        Self::check(&self.undeletable, path)?;
        self.inner.remove_file(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Self::check(&self.unreadable, path)?;
        self.inner.read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.spend_write(path)?;
        self.inner.write(path, data)
    }

    fn hard_link(&self, from: &Path, to: &Path) -> Result<()> {
        if self.no_links.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Injected(to.to_path_buf()));
        }
        Self::check(&self.fail_transfer, to)?;
        self.inner.hard_link(from, to)?;
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        Self::check(&self.fail_transfer, to)?;
        self.spend_write(to)?;
        let copied = self.inner.copy(from, to)?;
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(copied)
    }

    fn available_space(&self, path: &Path) -> Result<u64> {
        self.inner.available_space(path)
    }
}
