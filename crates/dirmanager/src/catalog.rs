//! Arena of block records with explicit reference counts.
//!
//! A record whose count drops to zero is not removed. It moves to the garbage
//! set, where a later reference can still resurrect it, until a collection pass
//! takes it out.

use aup_blockfile::{BlockFile, BlockName};
use derive_more::Display;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Stable identity of a catalog record.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct BlockId(u64);

#[derive(Debug)]
struct Record {
    block: Arc<BlockFile>,
    refs: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    records: BTreeMap<BlockId, Record>,
    by_name: HashMap<BlockName, BlockId>,
    garbage: BTreeSet<BlockId>,
    next: u64,
}

impl Catalog {
    /// Insert with one reference.
    pub fn insert(&mut self, block: BlockFile) -> BlockId {
        let id = BlockId(self.next);
        self.next += 1;
        if let Some(name) = block.name() {
            self.by_name.insert(name.clone(), id);
        }
        self.records.insert(id, Record { block: Arc::new(block), refs: 1 });
        id
    }

    pub fn get(&self, id: BlockId) -> Option<&Arc<BlockFile>> {
        self.records.get(&id).map(|r| &r.block)
    }

    pub fn refs(&self, id: BlockId) -> Option<usize> {
        self.records.get(&id).map(|r| r.refs)
    }

    pub fn id_of(&self, name: &BlockName) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn contains_name(&self, name: &BlockName) -> bool {
        self.by_name.contains_key(name)
    }

    /// Add a reference, resurrecting a record from the garbage set.
    pub fn add_ref(&mut self, id: BlockId) -> Option<usize> {
        let record = self.records.get_mut(&id)?;
        record.refs += 1;
        self.garbage.remove(&id);
        Some(record.refs)
    }

    /// Drop a reference; at zero the record becomes garbage.
    pub fn release(&mut self, id: BlockId) -> Option<usize> {
        let record = self.records.get_mut(&id)?;
        record.refs = record.refs.saturating_sub(1);
        if record.refs == 0 {
            self.garbage.insert(id);
        }
        Some(record.refs)
    }

    pub fn remove(&mut self, id: BlockId) -> Option<Arc<BlockFile>> {
        let record = self.records.remove(&id)?;
        self.garbage.remove(&id);
        if let Some(name) = record.block.name() {
            if self.by_name.get(name) == Some(&id) {
                self.by_name.remove(name);
            }
        }
        Some(record.block)
    }

    pub fn garbage(&self) -> Vec<BlockId> {
        self.garbage.iter().copied().collect()
    }

    /// Records with at least one reference.
    pub fn live_len(&self) -> usize {
        self.records.len() - self.garbage.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Arc<BlockFile>)> {
        self.records.iter().map(|(id, r)| (*id, &r.block))
    }

    /// Swap every block for `f(block)`, keeping ids and counts.
    pub fn replace_all(&mut self, mut f: impl FnMut(&BlockFile) -> BlockFile) {
        for record in self.records.values_mut() {
            record.block = Arc::new(f(&record.block));
        }
    }
}
