//! Block name allocation and directory balancing.
//!
//! Block files are spread over `eTT/dMM` directories so no single directory
//! grows without bound. Occupancy is tracked per bucket:
//!
//! * a **top** bucket (`eTT`) counts its mid directories and is full at
//!   `top_capacity`;
//! * a **mid** bucket (`dMM`, keyed as `TT << 8 | MM`) counts its files and is
//!   full at `mid_capacity`.
//!
//! New names go into the lowest-numbered available mid bucket. When none is
//! available, up to [`MID_BATCH`] new ones are opened in the lowest available
//! top bucket. Once every bucket is full, names are placed at random.

use crate::error::{ErrorKind, Result};
use aup_blockfile::BlockName;
use aup_blockfile::name::{DATA_EXT, FILE_NUMBERS, SUMMARY_EXT, top_dir_name};
use aup_config::Balance;
use aup_storage::Filesystem;
use exn::ResultExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Mid buckets opened at once when the pool runs dry.
pub const MID_BATCH: usize = 32;
/// Give up after this many candidate names.
const MAX_ATTEMPTS: usize = 1 << 20;

fn mid_key(top: u8, mid: u8) -> u16 {
    u16::from(top) << 8 | u16::from(mid)
}

fn split_key(key: u16) -> (u8, u8) {
    ((key >> 8) as u8, key as u8)
}

#[derive(Debug)]
pub struct NameAllocator {
    top_capacity: u32,
    mid_capacity: u32,
    top_pool: BTreeMap<u8, u32>,
    top_full: BTreeMap<u8, u32>,
    mid_pool: BTreeMap<u16, u32>,
    mid_full: BTreeMap<u16, u32>,
    /// Names already counted, so registering twice is harmless.
    counted: HashSet<BlockName>,
    rng: StdRng,
}

impl NameAllocator {
    pub fn new(balance: Balance, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut allocator = Self {
            top_capacity: u32::from(balance.top_capacity.max(1)),
            mid_capacity: u32::from(balance.mid_capacity.max(1)),
            top_pool: BTreeMap::new(),
            top_full: BTreeMap::new(),
            mid_pool: BTreeMap::new(),
            mid_full: BTreeMap::new(),
            counted: HashSet::new(),
            rng,
        };
        allocator.reset();
        allocator
    }

    /// Forget every count; all top buckets become available and empty.
    pub fn reset(&mut self) {
        self.top_pool = (0..=u8::MAX).map(|top| (top, 0)).collect();
        self.top_full.clear();
        self.mid_pool.clear();
        self.mid_full.clear();
        self.counted.clear();
    }

    /// Number of names currently counted.
    pub fn len(&self) -> usize {
        self.counted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counted.is_empty()
    }

    pub fn is_counted(&self, name: &BlockName) -> bool {
        self.counted.contains(name)
    }

    /// Open mid bucket `mid` in `top` if it isn't known yet.
    fn mid_add(&mut self, top: u8, mid: u8) -> bool {
        let key = mid_key(top, mid);
        if self.mid_pool.contains_key(&key) || self.mid_full.contains_key(&key) {
            return false;
        }
        self.mid_pool.insert(key, 0);
        if let Some(count) = self.top_full.get_mut(&top) {
            *count += 1;
            return true;
        }
        let count = self.top_pool.entry(top).or_insert(0);
        *count += 1;
        if *count >= self.top_capacity {
            let count = *count;
            self.top_pool.remove(&top);
            self.top_full.insert(top, count);
        }
        true
    }

    fn file_add(&mut self, key: u16) {
        if let Some(count) = self.mid_full.get_mut(&key) {
            *count += 1;
            return;
        }
        let count = self.mid_pool.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.mid_capacity {
            let count = *count;
            self.mid_pool.remove(&key);
            self.mid_full.insert(key, count);
        }
    }

    /// Count a name that exists (loaded from a project, found on disk, or just
    /// allocated). Returns `false` for unmanaged or already-counted names.
    pub fn register(&mut self, name: &BlockName) -> bool {
        let Some((top, mid)) = name.buckets() else {
            return false;
        };
        if !self.counted.insert(name.clone()) {
            return false;
        }
        self.mid_add(top, mid);
        self.file_add(mid_key(top, mid));
        true
    }

    /// Reset and count every managed block file among `paths`. Files whose
    /// directories don't match their name are skipped.
    pub fn rebuild<'a>(&mut self, paths: impl IntoIterator<Item = &'a Path>) -> usize {
        self.reset();
        let mut registered = 0;
        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok((name, Some(_))) = BlockName::from_file_name(file_name) else {
                continue;
            };
            if name.is_managed() && name.placement_matches(path) && self.register(&name) {
                registered += 1;
            }
        }
        tracing::debug!(registered, "Rebuilt directory balance");
        registered
    }

    /// Uncount `name` and remove its directories once they hold nothing.
    ///
    /// Names that were never counted are ignored.
    pub fn release(&mut self, fs: &dyn Filesystem, name: &BlockName, data_dir: &Path) {
        if !self.counted.remove(name) {
            tracing::debug!(block = %name, "Released a name that was never counted");
            return;
        }
        let Some((top, mid)) = name.buckets() else {
            return;
        };
        let key = mid_key(top, mid);
        let count = match self.mid_full.remove(&key) {
            Some(count) => count,
            None => self.mid_pool.get(&key).copied().unwrap_or(0),
        }
        .saturating_sub(1);
        if count >= 1 {
            self.mid_pool.insert(key, count);
            return;
        }
        self.mid_pool.remove(&key);
        remove_dir_quietly(fs, &name.dir(data_dir));

        let count = match self.top_full.remove(&top) {
            Some(count) => count,
            None => self.top_pool.get(&top).copied().unwrap_or(0),
        }
        .saturating_sub(1);
        // The top bucket stays in the pool even when empty.
        self.top_pool.insert(top, count);
        if count < 1 {
            remove_dir_quietly(fs, &data_dir.join(top_dir_name(top)));
        }
    }

    /// Pick a fresh name, create its directory and count it.
    ///
    /// `taken` reports names already in the catalog. Names whose files already
    /// exist on disk are counted as occupied and skipped.
    pub fn allocate(
        &mut self,
        fs: &dyn Filesystem,
        data_dir: &Path,
        taken: impl Fn(&BlockName) -> bool,
    ) -> Result<(BlockName, PathBuf)> {
        for _ in 0..MAX_ATTEMPTS {
            if self.mid_pool.is_empty() && self.open_mid_buckets() {
                continue;
            }
            let (top, mid) = match self.mid_pool.keys().next() {
                Some(&key) => split_key(key),
                None => (self.rng.r#gen(), self.rng.r#gen()),
            };
            let name = BlockName::managed(top, mid, self.rng.gen_range(0..FILE_NUMBERS));
            if taken(&name) || self.counted.contains(&name) {
                continue;
            }
            if fs.exists(&name.file_path(data_dir, DATA_EXT)) || fs.exists(&name.file_path(data_dir, SUMMARY_EXT)) {
                tracing::debug!(block = %name, "Name collides with a file on disk");
                self.register(&name);
                continue;
            }
            let dir = name.dir(data_dir);
            fs.create_dir_all(&dir).or_raise(|| ErrorKind::Storage)?;
            self.register(&name);
            return Ok((name, dir));
        }
        exn::bail!(ErrorKind::NamesExhausted(data_dir.to_path_buf()))
    }

    /// Open up to [`MID_BATCH`] mid buckets in the lowest available top
    /// bucket. Returns `false` if every top bucket is full.
    fn open_mid_buckets(&mut self) -> bool {
        let Some(&top) = self.top_pool.keys().next() else {
            return false;
        };
        let mut opened = 0;
        for mid in 0..=u8::MAX {
            if self.mid_add(top, mid) {
                opened += 1;
                if opened >= MID_BATCH || !self.top_pool.contains_key(&top) {
                    break;
                }
            }
        }
        if self.mid_pool.is_empty() {
            // Every mid number in this top bucket is used even though it was
            // counted as available. Retire it so allocation can move on.
            let count = self.top_pool.remove(&top).unwrap_or(0);
            self.top_full.insert(top, count.max(self.top_capacity));
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn mid_count(&self, top: u8, mid: u8) -> Option<u32> {
        let key = mid_key(top, mid);
        self.mid_pool.get(&key).or(self.mid_full.get(&key)).copied()
    }

    #[cfg(test)]
    pub(crate) fn is_mid_full(&self, top: u8, mid: u8) -> bool {
        self.mid_full.contains_key(&mid_key(top, mid))
    }
}

fn remove_dir_quietly(fs: &dyn Filesystem, dir: &Path) {
    // Fails harmlessly when the directory still holds files.
    if fs.remove_dir(dir).is_ok() {
        tracing::debug!(path = %dir.display(), "Removed empty bucket directory");
    }
}
