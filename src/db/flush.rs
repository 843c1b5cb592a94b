use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use parking_lot::MutexGuard;
use rayon::prelude::*;

use crate::{
    db::db::{DB, DbInner, DbState},
    key::InternalKey,
    memtable::MemTable,
    snapshot::EfosInner,
    util::Result,
    version::{FileMetaData, Table, VersionEdit},
};

/// Builds one level-0 table from a set of memtables.
pub(crate) fn build_flush_table(mems: &[Arc<MemTable>]) -> Table {
    let mut points: Vec<(InternalKey, bytes::Bytes)> = mems
        .par_iter()
        .flat_map_iter(|m| m.collect_points())
        .collect();
    points.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let range_dels = mems.iter().flat_map(|m| m.range_tombstones()).collect();
    let range_keys = mems.iter().flat_map(|m| m.range_key_spans()).collect();
    Table::new(points, range_dels, range_keys)
}

impl DbInner {
    /// Starts a background flush of the immutable memtables unless one is
    /// already running or there is nothing to flush.
    pub(crate) fn maybe_schedule_flush(self: &Arc<Self>, state: &mut DbState) {
        if state.flushing || state.mem.immutables().is_empty() {
            return;
        }
        state.flushing = true;
        let db = Arc::clone(self);
        thread::spawn(move || db.background_flush());
    }

    /// After `delay`, rotates `mem` if it is still the mutable memtable and
    /// flushes it. At most one delayed flush is scheduled per memtable.
    pub(crate) fn maybe_schedule_delayed_flush(
        self: &Arc<Self>,
        mem: &Arc<MemTable>,
        delay: Duration,
    ) {
        if !mem.try_mark_delayed_flush() {
            return;
        }
        self.statistics.record_delayed_flush_scheduled();
        log::debug!("scheduling delayed flush of memtable #{} in {:?}", mem.id(), delay);

        let db = Arc::clone(self);
        let mem = Arc::clone(mem);
        thread::spawn(move || {
            thread::sleep(delay);
            if db.shutting_down.load(Ordering::Acquire) {
                return;
            }
            let mut state = db.mu.lock();
            if Arc::ptr_eq(state.mem.mutable(), &mem) {
                if mem.is_empty() {
                    // Nothing to flush yet; allow a later request to retry.
                    mem.reset_delayed_flush();
                } else {
                    db.rotate_memtable(&mut state);
                }
            }
            db.maybe_schedule_flush(&mut state);
            db.compact_cond.notify_all();
        });
    }

    fn background_flush(self: &Arc<Self>) {
        let mut state = self.mu.lock();
        if let Err(err) = self.flush_memtables(&mut state) {
            log::warn!("background flush failed: {err}");
            self.statistics.record_background_error();
            state.bg_error = Some(err);
        }
        state.flushing = false;

        self.maybe_schedule_obsolete_file_deletion(&mut state);
        self.maybe_schedule_compaction(&mut state);
        self.maybe_schedule_flush(&mut state);
        self.compact_cond.notify_all();
    }

    /// Flushes every immutable memtable into a single level-0 file, then
    /// moves every eventually file-only snapshot whose data is now entirely
    /// in files to its file-only phase.
    fn flush_memtables(self: &Arc<Self>, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let mems: Vec<Arc<MemTable>> = state.mem.immutables().to_vec();
        if mems.is_empty() {
            return Ok(());
        }
        let number = state.versions.new_file_number();

        let table = MutexGuard::unlocked(state, || build_flush_table(&mems));

        let mut edit = VersionEdit::new();
        let mut bytes = 0;
        if let Some(file) = FileMetaData::from_table(number, table) {
            bytes = file.file_size;
            edit.set_last_sequence(file.largest_seq_num);
            edit.add_file(0, file);
        }
        state.versions.log_and_apply(edit)?;
        state.mem.remove_flushed(mems.len());
        self.install_read_state(state);
        self.statistics.record_memtable_flush(bytes);
        log::debug!(
            "flushed {} memtables into file #{} ({} bytes)",
            mems.len(),
            number,
            bytes
        );

        self.transition_flushed_snapshots(state);
        Ok(())
    }

    fn transition_flushed_snapshots(&self, state: &mut DbState) {
        let earliest_unflushed = self.earliest_unflushed_seq_num(state);
        let ready: Vec<Arc<EfosInner>> = state
            .snapshots
            .efos_handles()
            .into_iter()
            .filter(|efos| !efos.is_excised() && efos.seq_num() < earliest_unflushed)
            .collect();

        for efos in ready {
            let vers = state.versions.acquire_current();
            if let Err(err) = efos.transition_to_file_only_snapshot(state, vers) {
                log::trace!(
                    "skipped transition of snapshot at seq {}: {err}",
                    efos.seq_num()
                );
            }
        }
    }

    /// Flushes the given memtables (and everything older) and waits until
    /// none of them remains in the queue.
    pub(crate) fn flush_and_wait(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        targets: &[Arc<MemTable>],
    ) -> Result<()> {
        while targets.iter().any(|m| state.mem.contains(m)) {
            if let Some(err) = &state.bg_error {
                return Err(err.clone());
            }
            self.maybe_schedule_flush(state);
            self.compact_cond.wait(state);
        }
        Ok(())
    }
}

impl DB {
    /// Flushes every memtable holding data and waits for completion.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner();
        let mut state = inner.mu.lock();
        inner.rotate_memtable(&mut state);
        let targets = state.mem.immutables().to_vec();
        inner.flush_and_wait(&mut state, &targets)
    }
}
