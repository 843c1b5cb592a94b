use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::{
    db::{
        options::{DbOptions, IterOptions},
        read_state::{PinnedSource, ReadStateRef, ReadView},
        write_batch::WriteBatch,
    },
    iterator::{DbIter, MergingIterator, ScanInternalVisitor, scan_internal::scan_internal},
    key::{KeyRange, SeqNum},
    memtable::MemTableQueue,
    snapshot::{EventuallyFileOnlySnapshot, Snapshot, SnapshotList},
    statistics::Statistics,
    util::{Result, Status},
    version::{NUM_LEVELS, VersionSet},
};

/// Engine state guarded by the engine-wide lock.
pub(crate) struct DbState {
    pub(crate) mem: MemTableQueue,
    pub(crate) versions: VersionSet,
    pub(crate) snapshots: SnapshotList,
    read_state: Option<ReadStateRef>,
    /// A background flush is running
    pub(crate) flushing: bool,
    /// A compaction, elision-only compaction or excise rewrite is running
    pub(crate) compacting: bool,
    pub(crate) bg_error: Option<Status>,
}

impl DbState {
    pub(crate) fn read_state(&self) -> &ReadStateRef {
        match &self.read_state {
            Some(rs) => rs,
            None => unreachable!("engine always has a current read state"),
        }
    }
}

/// Shared engine internals. Snapshots, iterators and background threads
/// hold an `Arc` of this.
pub(crate) struct DbInner {
    pub(crate) mu: Mutex<DbState>,
    /// Signalled whenever a flush or compaction completes
    pub(crate) compact_cond: Condvar,
    /// Sequence number of the last write visible to readers
    visible_seq_num: AtomicU64,
    pub(crate) options: DbOptions,
    pub(crate) statistics: Arc<Statistics>,
    pub(crate) shutting_down: AtomicBool,
}

impl DbInner {
    pub(crate) fn visible_seq_num(&self) -> SeqNum {
        self.visible_seq_num.load(Ordering::Acquire)
    }

    /// Sequence number the next write will be assigned.
    pub(crate) fn next_seq_num(&self) -> SeqNum {
        self.visible_seq_num() + 1
    }

    pub(crate) fn earliest_unflushed_seq_num(&self, state: &DbState) -> SeqNum {
        state.mem.earliest_unflushed_seq_num(self.next_seq_num())
    }

    /// Replaces the current read state with one over the current memtable
    /// queue and version.
    pub(crate) fn install_read_state(&self, state: &mut DbState) {
        let rs = ReadStateRef::new(
            state.mem.queue().to_vec(),
            state.versions.acquire_current(),
            Arc::clone(&self.statistics),
        );
        if let Some(old) = state.read_state.replace(rs) {
            old.release_locked(&mut state.versions);
        }
    }

    /// Seals the mutable memtable if it holds data. Returns whether it did.
    pub(crate) fn rotate_memtable(&self, state: &mut DbState) -> bool {
        if state.mem.mutable().is_empty() {
            return false;
        }
        state.mem.rotate(self.next_seq_num());
        self.install_read_state(state);
        true
    }

    /// Deletes files no live version references.
    pub(crate) fn maybe_schedule_obsolete_file_deletion(&self, state: &mut DbState) {
        let files = state.versions.take_obsolete_files();
        if files.is_empty() {
            return;
        }
        log::debug!("deleting obsolete files {:?}", files);
        self.statistics.record_obsolete_files_deleted(files.len() as u64);
    }

    /// Pins the current read state.
    pub(crate) fn pin_read_state(self: &Arc<Self>) -> ReadPin {
        let state = self.mu.lock();
        let rs = state.read_state().clone_ref();
        drop(state);
        ReadPin::new(Arc::clone(self), PinnedSource::ReadState(rs))
    }

    /// Releases a pinned source without the engine lock held, taking the
    /// lock only to retire a version that lost its last reference.
    pub(crate) fn release_pinned(&self, source: PinnedSource) {
        if let Some(version) = source.unref() {
            let mut state = self.mu.lock();
            state.versions.version_unreferenced(&version);
            self.maybe_schedule_obsolete_file_deletion(&mut state);
        }
    }

    pub(crate) fn get_pinned(&self, pin: &ReadPin, key: &[u8], seq_num: SeqNum) -> Result<Bytes> {
        pin.view().get(key, seq_num)
    }

    pub(crate) fn new_iter_pinned(
        &self,
        pin: ReadPin,
        seq_num: SeqNum,
        options: &IterOptions,
    ) -> DbIter {
        let view = pin.view();
        let (children, _) = view.point_iterators(NUM_LEVELS);
        let range_dels = view.range_tombstones(seq_num, NUM_LEVELS);
        DbIter::new(
            MergingIterator::new(children),
            seq_num,
            range_dels,
            options.lower_bound.clone(),
            options.upper_bound.clone(),
            pin,
        )
    }

    pub(crate) fn scan_internal_pinned(
        &self,
        pin: &ReadPin,
        seq_num: SeqNum,
        options: &IterOptions,
        visitor: &mut dyn ScanInternalVisitor,
    ) -> Result<()> {
        let view = pin.view();
        scan_internal(
            &view,
            seq_num,
            options.lower_bound.as_deref(),
            options.upper_bound.as_deref(),
            self.options.shared_storage,
            visitor,
        )
    }

    fn write(self: &Arc<Self>, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.mu.lock();
        if let Some(err) = &state.bg_error {
            return Err(err.clone());
        }

        let mem = Arc::clone(state.mem.mutable());
        let last = batch.apply_to(&mem, self.next_seq_num());
        self.visible_seq_num.store(last, Ordering::Release);

        if mem.approximate_memory_usage() >= self.options.write_buffer_size {
            self.rotate_memtable(&mut state);
            self.maybe_schedule_flush(&mut state);
        }
        Ok(())
    }
}

/// Pins a read state or version for the lifetime of a read. Released on
/// drop.
pub(crate) struct ReadPin {
    db: Arc<DbInner>,
    source: Option<PinnedSource>,
}

impl ReadPin {
    pub(crate) fn new(db: Arc<DbInner>, source: PinnedSource) -> Self {
        ReadPin {
            db,
            source: Some(source),
        }
    }

    pub(crate) fn view(&self) -> ReadView {
        match &self.source {
            Some(source) => source.view(),
            None => unreachable!("read pin source is only taken on drop"),
        }
    }
}

impl Drop for ReadPin {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            self.db.release_pinned(source);
        }
    }
}

/// The main database handle
///
/// All data lives in memory: writes go to memtables, flushes turn
/// immutable memtables into level-0 files, and compactions merge files
/// down the levels while eliding versions no snapshot can observe.
pub struct DB {
    inner: Arc<DbInner>,
}

impl DB {
    pub fn open(options: DbOptions) -> Result<Self> {
        if options.write_buffer_size == 0 {
            return Err(Status::invalid_argument("write_buffer_size must be positive"));
        }
        if options.l0_compaction_trigger == 0 {
            return Err(Status::invalid_argument(
                "l0_compaction_trigger must be positive",
            ));
        }

        let statistics = Arc::new(Statistics::new());
        let state = DbState {
            mem: MemTableQueue::new(1),
            versions: VersionSet::new(Arc::clone(&statistics)),
            snapshots: SnapshotList::new(),
            read_state: None,
            flushing: false,
            compacting: false,
            bg_error: None,
        };

        let inner = DbInner {
            mu: Mutex::new(state),
            compact_cond: Condvar::new(),
            visible_seq_num: AtomicU64::new(0),
            options,
            statistics,
            shutting_down: AtomicBool::new(false),
        };
        {
            let mut state = inner.mu.lock();
            inner.install_read_state(&mut state);
        }

        log::debug!("opened database with options {:?}", inner.options);
        Ok(DB {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(key, value);
        self.write(&batch)
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&batch)
    }

    /// Deletes every key in `[start, end)`.
    pub fn delete_range(&self, start: impl Into<Bytes>, end: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_range(start, end);
        self.write(&batch)
    }

    pub fn range_key_set(
        &self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        suffix: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.range_key_set(start, end, suffix, value);
        self.write(&batch)
    }

    pub fn range_key_unset(
        &self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        suffix: impl Into<Bytes>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.range_key_unset(start, end, suffix);
        self.write(&batch)
    }

    pub fn range_key_delete(&self, start: impl Into<Bytes>, end: impl Into<Bytes>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.range_key_delete(start, end);
        self.write(&batch)
    }

    /// Applies every operation of `batch` atomically.
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.inner.write(batch)
    }

    /// Point lookup of the latest visible value.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let pin = self.inner.pin_read_state();
        self.inner.get_pinned(&pin, key, self.inner.visible_seq_num())
    }

    /// Iterator over the latest visible data.
    pub fn new_iter(&self, options: &IterOptions) -> Result<DbIter> {
        let pin = self.inner.pin_read_state();
        let seq_num = self.inner.visible_seq_num();
        Ok(self.inner.new_iter_pinned(pin, seq_num, options))
    }

    /// Creates a snapshot of the current state.
    pub fn new_snapshot(&self) -> Snapshot {
        let mut state = self.inner.mu.lock();
        let seq_num = self.inner.visible_seq_num();
        Snapshot::new_locked(&self.inner, &mut state, seq_num, None)
    }

    /// Creates an eventually file-only snapshot protecting `ranges`.
    pub fn new_eventually_file_only_snapshot(
        &self,
        ranges: &[KeyRange],
    ) -> EventuallyFileOnlySnapshot {
        EventuallyFileOnlySnapshot::new(&self.inner, ranges)
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }

    pub fn options(&self) -> &DbOptions {
        &self.inner.options
    }

    pub fn visible_seq_num(&self) -> SeqNum {
        self.inner.visible_seq_num()
    }

    pub fn earliest_unflushed_seq_num(&self) -> SeqNum {
        let state = self.inner.mu.lock();
        self.inner.earliest_unflushed_seq_num(&state)
    }

    /// Number of open snapshots, including those held by eventually
    /// file-only snapshots that are not yet file-only.
    pub fn snapshot_count(&self) -> usize {
        self.inner.mu.lock().snapshots.count()
    }

    pub fn earliest_snapshot_seq_num(&self) -> SeqNum {
        self.inner.mu.lock().snapshots.earliest()
    }

    pub fn snapshot_seq_nums(&self) -> Vec<SeqNum> {
        self.inner.mu.lock().snapshots.to_sequence_slice()
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.inner.mu.lock().versions.current().num_level_files(level)
    }

    pub fn num_immutable_memtables(&self) -> usize {
        self.inner.mu.lock().mem.immutables().len()
    }

    pub fn live_file_numbers(&self) -> Vec<u64> {
        self.inner.mu.lock().versions.live_file_numbers()
    }

    pub fn obsolete_file_count(&self) -> usize {
        self.inner.mu.lock().versions.obsolete_file_count()
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("visible_seq_num", &self.inner.visible_seq_num())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let mut state = self.inner.mu.lock();
        while state.flushing || state.compacting {
            self.inner.compact_cond.wait(&mut state);
        }
        log::debug!("database closed");
    }
}
