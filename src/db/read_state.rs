use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::iterator::{InternalIterator, IteratorLevel, MemTableIterator, TableIterator};
use crate::key::{InternalKey, RangeKeySpan, RangeTombstone, SeqNum};
use crate::memtable::MemTable;
use crate::statistics::Statistics;
use crate::util::{Result, Status};
use crate::version::{Version, VersionRef, VersionSet};

/// The memtables and version a read is served from.
#[derive(Clone)]
pub struct ReadView {
    /// Oldest first, mutable memtable last.
    pub memtables: Vec<Arc<MemTable>>,
    pub version: Arc<Version>,
}

impl ReadView {
    /// Point iterators over every source, newest first, restricted to
    /// levels below `max_level`, with the level each one reads.
    pub(crate) fn point_iterators(
        &self,
        max_level: usize,
    ) -> (Vec<Box<dyn InternalIterator>>, Vec<IteratorLevel>) {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        let mut levels = Vec::new();
        for (index, mem) in self.memtables.iter().rev().enumerate() {
            children.push(Box::new(MemTableIterator::new(Arc::clone(mem))));
            levels.push(IteratorLevel::Memtable { index });
        }
        for level in 0..max_level {
            for file in self.version.get_level_files(level).iter().rev() {
                children.push(Box::new(TableIterator::new(Arc::clone(&file.table))));
                levels.push(IteratorLevel::Level {
                    level,
                    file_number: file.number,
                });
            }
        }
        (children, levels)
    }

    /// Range deletions visible at `seq_num` from levels below `max_level`.
    pub(crate) fn range_tombstones(
        &self,
        seq_num: SeqNum,
        max_level: usize,
    ) -> Vec<RangeTombstone> {
        let mem_dels = self.memtables.iter().flat_map(|m| m.range_tombstones());
        let file_dels = (0..max_level)
            .flat_map(|level| self.version.get_level_files(level))
            .flat_map(|f| f.table.range_dels().iter().cloned());
        mem_dels
            .chain(file_dels)
            .filter(|t| t.seq_num <= seq_num)
            .collect()
    }

    /// Range keys visible at `seq_num` from levels below `max_level`.
    pub(crate) fn range_key_spans(&self, seq_num: SeqNum, max_level: usize) -> Vec<RangeKeySpan> {
        let mem_keys = self.memtables.iter().flat_map(|m| m.range_key_spans());
        let file_keys = (0..max_level)
            .flat_map(|level| self.version.get_level_files(level))
            .flat_map(|f| f.table.range_keys().iter().cloned());
        mem_keys
            .chain(file_keys)
            .filter(|s| s.key.seq_num <= seq_num)
            .collect()
    }

    /// Point lookup as of `seq_num`.
    pub fn get(&self, key: &[u8], seq_num: SeqNum) -> Result<Bytes> {
        let mut newest: Option<(InternalKey, Bytes)> = None;
        let mut consider = |entry: Option<(InternalKey, Bytes)>| {
            if let Some(entry) = entry
                && newest
                    .as_ref()
                    .is_none_or(|(k, _)| entry.0.seq_num() > k.seq_num())
            {
                newest = Some(entry);
            }
        };

        for mem in &self.memtables {
            consider(mem.get(key, seq_num));
        }
        for level in 0..self.version.files.len() {
            for file in self.version.get_overlapping_files(level, key, key) {
                consider(file.table.get(key, seq_num));
            }
        }

        let Some((found, value)) = newest else {
            return Err(Status::not_found("key not found"));
        };
        if found.is_deletion() {
            return Err(Status::not_found("key deleted"));
        }
        let covered = self
            .range_tombstones(seq_num, self.version.files.len())
            .iter()
            .any(|t| t.covers(key, found.seq_num()));
        if covered {
            return Err(Status::not_found("key deleted by range deletion"));
        }
        Ok(value)
    }
}

/// A bundle of the live memtables and the current version.
///
/// Holds a version reference for as long as the read state itself is
/// referenced.
pub struct ReadState {
    memtables: Vec<Arc<MemTable>>,
    version: Arc<Version>,
    version_ref: Mutex<Option<VersionRef>>,
    refs: AtomicUsize,
    statistics: Arc<Statistics>,
}

impl ReadState {
    pub fn memtables(&self) -> &[Arc<MemTable>] {
        &self.memtables
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

/// A counted reference to a [`ReadState`].
///
/// Move-only, like [`VersionRef`]; releasing the last reference releases
/// the embedded version reference.
#[must_use = "a read state reference must be released"]
pub struct ReadStateRef {
    state: Arc<ReadState>,
}

impl ReadStateRef {
    /// Creates a read state with a single reference, taking ownership of
    /// `version_ref`.
    pub(crate) fn new(
        memtables: Vec<Arc<MemTable>>,
        version_ref: VersionRef,
        statistics: Arc<Statistics>,
    ) -> Self {
        statistics.record_read_state_ref_acquired();
        let state = ReadState {
            memtables,
            version: Arc::clone(version_ref.version()),
            version_ref: Mutex::new(Some(version_ref)),
            refs: AtomicUsize::new(1),
            statistics,
        };
        ReadStateRef {
            state: Arc::new(state),
        }
    }

    /// Takes another reference to the same read state.
    pub fn clone_ref(&self) -> Self {
        self.state.refs.fetch_add(1, Ordering::AcqRel);
        self.state.statistics.record_read_state_ref_acquired();
        ReadStateRef {
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> &Arc<ReadState> {
        &self.state
    }

    pub fn view(&self) -> ReadView {
        ReadView {
            memtables: self.state.memtables.clone(),
            version: Arc::clone(&self.state.version),
        }
    }

    /// Drops this reference. If it was the last one, returns the version
    /// reference the read state held.
    pub(crate) fn unref(self) -> Option<VersionRef> {
        let prev = self.state.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "read state reference count underflow");
        self.state.statistics.record_read_state_ref_released();
        if prev == 1 {
            self.state.version_ref.lock().take()
        } else {
            None
        }
    }

    /// Releases the reference while the engine lock is held.
    pub fn release_locked(self, versions: &mut VersionSet) {
        if let Some(version_ref) = self.unref() {
            version_ref.release_locked(versions);
        }
    }
}

/// A reference pinning the data a reader observes.
pub(crate) enum PinnedSource {
    ReadState(ReadStateRef),
    Version(VersionRef),
}

impl PinnedSource {
    pub(crate) fn view(&self) -> ReadView {
        match self {
            PinnedSource::ReadState(rs) => rs.view(),
            PinnedSource::Version(v) => ReadView {
                memtables: Vec::new(),
                version: Arc::clone(v.version()),
            },
        }
    }

    /// Drops the reference without the engine lock. Returns the version
    /// that lost its last reference, which must then be retired under the
    /// lock.
    pub(crate) fn unref(self) -> Option<Arc<Version>> {
        let version_ref = match self {
            PinnedSource::ReadState(rs) => rs.unref()?,
            PinnedSource::Version(v) => v,
        };
        version_ref.unref()
    }
}
