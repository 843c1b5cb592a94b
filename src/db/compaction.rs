use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use bytes::Bytes;
use parking_lot::MutexGuard;

use crate::{
    db::db::{DB, DbInner, DbState},
    key::{InternalKey, RangeTombstone, SEQ_NUM_MAX, SeqNum},
    util::{Result, Status},
    version::{FileMetaData, NUM_LEVELS, Table, Version, VersionEdit},
};

/// Index of the snapshot stripe `seq_num` falls in. Two versions of a key in
/// the same stripe are indistinguishable to every open snapshot.
fn stripe(snapshots: &[SeqNum], seq_num: SeqNum) -> usize {
    snapshots.partition_point(|&s| s < seq_num)
}

/// Drops point entries no snapshot can observe.
///
/// `points` must be in internal key order. Within a stripe only the newest
/// version of a key survives, and it is dropped too if a newer range
/// deletion of the same stripe covers it. At the bottommost position a
/// deletion that ends up as the oldest surviving version is dropped.
fn elide_points(
    points: Vec<(InternalKey, Bytes)>,
    range_dels: &[RangeTombstone],
    snapshots: &[SeqNum],
    bottommost: bool,
) -> Vec<(InternalKey, Bytes)> {
    let mut out: Vec<(InternalKey, Bytes)> = Vec::with_capacity(points.len());
    let mut current_key: Option<Bytes> = None;
    let mut last_stripe = None;
    let mut key_start = 0;

    let finish_key = |out: &mut Vec<(InternalKey, Bytes)>, key_start: usize| {
        if bottommost && out.len() > key_start && out.last().is_some_and(|(k, _)| k.is_deletion()) {
            out.pop();
        }
    };

    for (key, value) in points {
        if current_key.as_ref() != Some(key.user_key()) {
            finish_key(&mut out, key_start);
            current_key = Some(key.user_key().clone());
            last_stripe = None;
            key_start = out.len();
        }

        let s = stripe(snapshots, key.seq_num());
        if last_stripe == Some(s) {
            continue;
        }
        last_stripe = Some(s);

        let covered = range_dels.iter().any(|t| {
            t.covers(key.user_key(), key.seq_num()) && stripe(snapshots, t.seq_num) == s
        });
        if !covered {
            out.push((key, value));
        }
    }
    finish_key(&mut out, key_start);
    out
}

/// Merges `tables` into one, eliding everything the open `snapshots` cannot
/// observe.
pub(crate) fn compact_tables(
    tables: &[Arc<Table>],
    snapshots: &[SeqNum],
    bottommost: bool,
) -> Table {
    let mut points: Vec<(InternalKey, Bytes)> = tables
        .iter()
        .flat_map(|t| t.points().iter().cloned())
        .collect();
    points.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let range_dels: Vec<RangeTombstone> = tables
        .iter()
        .flat_map(|t| t.range_dels().iter().cloned())
        .collect();
    let points = elide_points(points, &range_dels, snapshots, bottommost);

    let earliest = snapshots.first().copied().unwrap_or(SEQ_NUM_MAX);
    let range_dels = range_dels
        .into_iter()
        .filter(|t| !(bottommost && t.seq_num <= earliest))
        .collect();
    let range_keys = tables
        .iter()
        .flat_map(|t| t.range_keys().iter().cloned())
        .collect();

    Table::new(points, range_dels, range_keys)
}

/// Whether no file at `level` or below, other than `inputs`, overlaps
/// `[smallest, largest]`.
fn is_bottommost(
    version: &Version,
    level: usize,
    smallest: &[u8],
    largest: &[u8],
    inputs: &[u64],
) -> bool {
    (level..NUM_LEVELS).all(|l| {
        version
            .get_overlapping_files(l, smallest, largest)
            .iter()
            .all(|f| inputs.contains(&f.number))
    })
}

fn key_bounds(files: &[Arc<FileMetaData>]) -> Option<(Bytes, Bytes)> {
    let smallest = files.iter().map(|f| &f.smallest).min()?.clone();
    let largest = files.iter().map(|f| &f.largest).max()?.clone();
    Some((smallest, largest))
}

impl DbInner {
    /// Starts an automatic compaction if a level has outgrown its target.
    pub(crate) fn maybe_schedule_compaction(self: &Arc<Self>, state: &mut DbState) {
        if self.options.disable_automatic_compactions
            || state.compacting
            || self.shutting_down.load(Ordering::Acquire)
        {
            return;
        }
        let Some(level) = state
            .versions
            .current()
            .pick_compaction_level(self.options.l0_compaction_trigger)
        else {
            return;
        };

        state.compacting = true;
        let db = Arc::clone(self);
        thread::spawn(move || {
            let mut state = db.mu.lock();
            if let Err(err) = db.run_compaction(&mut state, level) {
                log::warn!("compaction of level {level} failed: {err}");
                db.statistics.record_background_error();
            }
            db.finish_compaction(&mut state);
        });
    }

    pub(crate) fn finish_compaction(self: &Arc<Self>, state: &mut DbState) {
        state.compacting = false;
        self.maybe_schedule_obsolete_file_deletion(state);
        self.maybe_schedule_compaction(state);
        self.compact_cond.notify_all();
    }

    /// Merges every file at `level` with the overlapping files of
    /// `level + 1`. The caller must have set `compacting`.
    pub(crate) fn run_compaction(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        level: usize,
    ) -> Result<()> {
        let version = Arc::clone(state.versions.current());
        let inputs = version.get_level_files(level).to_vec();
        let Some((smallest, largest)) = key_bounds(&inputs) else {
            return Ok(());
        };
        let output_level = level + 1;
        let next = version.get_overlapping_files(output_level, &smallest, &largest);

        let mut input_numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        input_numbers.extend(next.iter().map(|f| f.number));
        // Files pulled from the next level can carry range deletions wider
        // than the level being compacted.
        let all_inputs: Vec<Arc<FileMetaData>> =
            inputs.iter().chain(next.iter()).cloned().collect();
        let Some((smallest, largest)) = key_bounds(&all_inputs) else {
            return Ok(());
        };
        let bottommost = is_bottommost(&version, level, &smallest, &largest, &input_numbers);

        let snapshots = state.snapshots.to_sequence_slice();
        let number = state.versions.new_file_number();
        let tables: Vec<Arc<Table>> = all_inputs.iter().map(|f| Arc::clone(&f.table)).collect();

        let output =
            MutexGuard::unlocked(state, || compact_tables(&tables, &snapshots, bottommost));

        let mut edit = VersionEdit::new();
        for f in &inputs {
            edit.delete_file(level, f.number);
        }
        for f in &next {
            edit.delete_file(output_level, f.number);
        }
        if let Some(file) = FileMetaData::from_table(number, output) {
            edit.add_file(output_level, file);
        }
        state.versions.log_and_apply(edit)?;
        self.install_read_state(state);
        self.statistics.record_compaction();
        log::debug!(
            "compacted {} files from level {} and {} from level {} (bottommost: {}, snapshots: {:?})",
            inputs.len(),
            level,
            next.len(),
            output_level,
            bottommost,
            snapshots
        );
        Ok(())
    }

    /// Called whenever the earliest snapshot may have moved up. Rewrites in
    /// place the first file holding data that no snapshot pins any more.
    pub(crate) fn maybe_schedule_elision_only_compaction(self: &Arc<Self>, state: &mut DbState) {
        self.statistics.record_elision_only_scheduled();
        if !self.options.elision_only_compactions
            || state.compacting
            || self.shutting_down.load(Ordering::Acquire)
        {
            return;
        }

        let earliest = state.snapshots.earliest();
        let version = state.versions.current();
        let candidate = (0..NUM_LEVELS).find_map(|level| {
            version
                .get_level_files(level)
                .iter()
                .find(|f| f.has_elision_candidates(earliest))
                .map(|f| (level, Arc::clone(f)))
        });
        let Some((level, file)) = candidate else {
            return;
        };

        log::debug!(
            "scheduling elision-only compaction of file #{} at level {} (earliest snapshot {})",
            file.number,
            level,
            earliest
        );
        state.compacting = true;
        let db = Arc::clone(self);
        thread::spawn(move || {
            let mut state = db.mu.lock();
            if let Err(err) = db.run_elision_only_compaction(&mut state, level, &file) {
                log::warn!("elision-only compaction of file #{} failed: {err}", file.number);
                db.statistics.record_background_error();
            }
            db.finish_compaction(&mut state);
        });
    }

    fn run_elision_only_compaction(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        level: usize,
        file: &Arc<FileMetaData>,
    ) -> Result<()> {
        let version = Arc::clone(state.versions.current());
        if !version.contains_file(file.number) {
            return Ok(());
        }
        let bottommost = is_bottommost(
            &version,
            level,
            &file.smallest,
            &file.largest,
            &[file.number],
        );
        let snapshots = state.snapshots.to_sequence_slice();
        let number = state.versions.new_file_number();
        let tables = [Arc::clone(&file.table)];

        let output =
            MutexGuard::unlocked(state, || compact_tables(&tables, &snapshots, bottommost));

        let mut edit = VersionEdit::new();
        edit.delete_file(level, file.number);
        if let Some(rewritten) = FileMetaData::from_table(number, output) {
            edit.add_file(level, rewritten);
        }
        state.versions.log_and_apply(edit)?;
        self.install_read_state(state);
        self.statistics.record_elision_only_compaction();
        log::debug!("elision-only compaction rewrote file #{} as #{}", file.number, number);
        Ok(())
    }
}

impl DB {
    /// Merges every file at `level` into `level + 1` and waits for the
    /// result to be installed.
    pub fn compact_level(&self, level: usize) -> Result<()> {
        if level + 1 >= NUM_LEVELS {
            return Err(Status::invalid_argument(format!(
                "cannot compact level {level}, the last level is {}",
                NUM_LEVELS - 1
            )));
        }
        let inner = self.inner();
        let mut state = inner.mu.lock();
        while state.compacting {
            inner.compact_cond.wait(&mut state);
        }
        state.compacting = true;
        let result = inner.run_compaction(&mut state, level);
        inner.finish_compaction(&mut state);
        result
    }
}
