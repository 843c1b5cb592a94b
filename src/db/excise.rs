use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::{
    db::db::{DB, DbInner, DbState},
    iterator::keyspan,
    key::{KeyRange, RangeKeySpan, RangeTombstone},
    memtable::MemTable,
    util::{Result, Status},
    version::{FileMetaData, NUM_LEVELS, Table, VersionEdit},
};

/// Copy of `table` with every key in `span` removed. Spans crossing the
/// boundary are cut at it.
pub(crate) fn excise_table(table: &Table, span: &KeyRange) -> Table {
    let points = table
        .points()
        .iter()
        .filter(|(k, _)| !span.contains(k.user_key()))
        .cloned()
        .collect();
    let range_dels = table
        .range_dels()
        .iter()
        .flat_map(|t| {
            keyspan::subtract(&t.start, &t.end, &span.start, &span.end)
                .into_iter()
                .map(|(start, end)| RangeTombstone::new(start, end, t.seq_num))
        })
        .collect();
    let range_keys = table
        .range_keys()
        .iter()
        .flat_map(|s| {
            keyspan::subtract(&s.start, &s.end, &span.start, &span.end)
                .into_iter()
                .map(|(start, end)| RangeKeySpan {
                    start,
                    end,
                    key: s.key.clone(),
                })
        })
        .collect();
    Table::new(points, range_dels, range_keys)
}

impl DbInner {
    /// Marks every eventually file-only snapshot that still pins memtables
    /// and protects part of `span` as excised, dropping its read state.
    fn excise_snapshots(&self, state: &mut DbState, span: &KeyRange) {
        let spans = std::slice::from_ref(span);
        for efos in state.snapshots.efos_handles() {
            if efos.is_file_only() || !efos.overlaps(spans) {
                continue;
            }
            efos.mark_excised();
            efos.release_read_state(state);
        }
        self.maybe_schedule_obsolete_file_deletion(state);
    }

    /// Replaces every file overlapping `span` by a copy without it. The
    /// caller must have set `compacting`.
    fn excise_files(&self, state: &mut MutexGuard<'_, DbState>, span: &KeyRange) -> Result<()> {
        let version = Arc::clone(state.versions.current());
        let mut inputs = Vec::new();
        for level in 0..NUM_LEVELS {
            for file in version.get_level_files(level) {
                if span.overlaps_inclusive(&file.smallest, &file.largest) {
                    let number = state.versions.new_file_number();
                    inputs.push((level, Arc::clone(file), number));
                }
            }
        }
        if inputs.is_empty() {
            return Ok(());
        }

        let outputs: Vec<Table> = MutexGuard::unlocked(state, || {
            inputs
                .iter()
                .map(|(_, file, _)| excise_table(&file.table, span))
                .collect()
        });

        let mut edit = VersionEdit::new();
        for ((level, file, number), table) in inputs.iter().zip(outputs) {
            edit.delete_file(*level, file.number);
            if let Some(rewritten) = FileMetaData::from_table(*number, table) {
                edit.add_file(*level, rewritten);
            }
        }
        state.versions.log_and_apply(edit)?;
        self.install_read_state(state);
        log::debug!("excised {:?} from {} files", span, inputs.len());
        Ok(())
    }
}

impl DB {
    /// Removes every key in `span` from the engine.
    ///
    /// Eventually file-only snapshots protecting part of `span` that have
    /// not yet become file-only are marked excised; those already file-only
    /// keep reading the data through their pinned version.
    pub fn excise(&self, span: KeyRange) -> Result<()> {
        if span.start >= span.end {
            return Err(Status::invalid_argument(format!(
                "invalid excise span {:?}",
                span
            )));
        }
        let inner = self.inner();
        let mut state = inner.mu.lock();
        inner.excise_snapshots(&mut state, &span);

        let spans = std::slice::from_ref(&span);
        if state.mem.mutable().overlaps(spans) {
            inner.rotate_memtable(&mut state);
        }
        let targets: Vec<Arc<MemTable>> = state
            .mem
            .immutables()
            .iter()
            .filter(|m| m.overlaps(spans))
            .cloned()
            .collect();
        inner.flush_and_wait(&mut state, &targets)?;

        while state.compacting {
            inner.compact_cond.wait(&mut state);
        }
        state.compacting = true;
        let result = inner.excise_files(&mut state, &span);
        if result.is_ok() {
            inner.statistics.record_excise();
        }
        inner.finish_compaction(&mut state);
        result
    }
}
