use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::{
    db::{DbInner, DbState, IterOptions},
    iterator::{DbIter, ScanInternalVisitor},
    key::SeqNum,
    snapshot::{SnapshotLink, efos::EfosInner},
    util::Result,
};

/// A point-in-time read view of the database.
///
/// Every read through a snapshot observes exactly the writes with a
/// sequence number at or below [`Snapshot::seq_num`]. While the snapshot is
/// open, compactions keep every version of a key it can observe.
///
/// Using a snapshot after it was closed panics, as does closing it twice.
/// A snapshot that is never closed explicitly is closed on drop.
pub struct Snapshot {
    /// `None` once closed
    db: Option<Arc<DbInner>>,
    seq_num: SeqNum,
    link: Option<SnapshotLink>,
}

impl Snapshot {
    /// Registers a snapshot at `seq_num`. `efos` is set when the snapshot is
    /// owned by an eventually file-only snapshot.
    pub(crate) fn new_locked(
        db: &Arc<DbInner>,
        state: &mut DbState,
        seq_num: SeqNum,
        efos: Option<Weak<EfosInner>>,
    ) -> Self {
        let mut link = None;
        state.snapshots.push_back(&mut link, seq_num, efos);
        db.statistics.record_snapshot_opened();
        log::debug!("opened snapshot at seq {seq_num}");
        Snapshot {
            db: Some(Arc::clone(db)),
            seq_num,
            link,
        }
    }

    fn db(&self) -> &Arc<DbInner> {
        match &self.db {
            Some(db) => db,
            None => panic!("snapshot already closed"),
        }
    }

    pub fn seq_num(&self) -> SeqNum {
        self.seq_num
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_none()
    }

    /// Point lookup as of this snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let db = self.db();
        let pin = db.pin_read_state();
        db.get_pinned(&pin, key, self.seq_num)
    }

    /// Unpositioned iterator over the data visible to this snapshot.
    pub fn new_iter(&self, options: &IterOptions) -> Result<DbIter> {
        let db = self.db();
        let pin = db.pin_read_state();
        Ok(db.new_iter_pinned(pin, self.seq_num, options))
    }

    /// Visits every internal key, range deletion and range key visible to
    /// this snapshot within the bounds of `options`.
    pub fn scan_internal(
        &self,
        options: &IterOptions,
        visitor: &mut dyn ScanInternalVisitor,
    ) -> Result<()> {
        let db = self.db();
        let pin = db.pin_read_state();
        db.scan_internal_pinned(&pin, self.seq_num, options, visitor)
    }

    /// Closes the snapshot, taking the engine lock.
    pub fn close(&mut self) -> Result<()> {
        let db = Arc::clone(self.db());
        let mut state = db.mu.lock();
        self.close_locked(&mut state)
    }

    /// Closes the snapshot with the engine lock already held.
    ///
    /// If this was the earliest snapshot, the floor below which compactions
    /// may drop data has risen and an elision-only compaction is considered.
    pub(crate) fn close_locked(&mut self, state: &mut DbState) -> Result<()> {
        let Some(db) = self.db.take() else {
            panic!("snapshot already closed");
        };
        state.snapshots.remove(&mut self.link);
        db.statistics.record_snapshot_closed();

        if state.snapshots.earliest() > self.seq_num {
            db.maybe_schedule_elision_only_compaction(state);
        }
        log::debug!("closed snapshot at seq {}", self.seq_num);
        Ok(())
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if let Some(db) = self.db.clone() {
            let mut state = db.mu.lock();
            if let Err(err) = self.close_locked(&mut state) {
                log::warn!("failed to close snapshot at seq {}: {err}", self.seq_num);
            }
        }
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("seq_num", &self.seq_num)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use test_log::test;

    use crate::{DB, DbOptions, IterOptions, Iterator};

    #[test]
    fn test_snapshot_reads_are_stable() {
        let db = DB::open(DbOptions::default()).unwrap();
        db.put("a", "1").unwrap();
        db.put("b", "1").unwrap();

        let mut snap = db.new_snapshot();
        db.put("a", "2").unwrap();
        db.delete("b").unwrap();
        db.put("c", "2").unwrap();

        assert_eq!(snap.get(b"a").unwrap(), "1");
        assert_eq!(snap.get(b"b").unwrap(), "1");
        assert!(snap.get(b"c").unwrap_err().is_not_found());
        assert_eq!(db.get(b"a").unwrap(), "2");

        let mut iter = snap.new_iter(&IterOptions::default()).unwrap();
        let mut seen = Vec::new();
        let mut valid = iter.seek_to_first().unwrap();
        while valid {
            seen.push((iter.key(), iter.value()));
            valid = iter.next().unwrap();
        }
        assert_eq!(
            seen,
            vec![
                (Bytes::from("a"), Bytes::from("1")),
                (Bytes::from("b"), Bytes::from("1")),
            ]
        );
        drop(iter);

        snap.close().unwrap();
        assert!(snap.is_closed());
    }

    #[test]
    fn test_snapshot_survives_flush_and_compaction() {
        let db = DB::open(DbOptions::default()).unwrap();
        db.put("k", "old").unwrap();
        let mut snap = db.new_snapshot();
        db.put("k", "new").unwrap();

        db.flush().unwrap();
        db.compact_level(0).unwrap();
        assert_eq!(snap.get(b"k").unwrap(), "old");
        assert_eq!(db.get(b"k").unwrap(), "new");
        snap.close().unwrap();
    }

    #[test]
    fn test_registry_tracks_open_snapshots() {
        let db = DB::open(DbOptions::default()).unwrap();
        db.put("a", "1").unwrap();
        let mut first = db.new_snapshot();
        db.put("a", "2").unwrap();
        let second = db.new_snapshot();

        assert_eq!(db.snapshot_seq_nums(), vec![first.seq_num(), second.seq_num()]);
        assert_eq!(db.earliest_snapshot_seq_num(), first.seq_num());

        first.close().unwrap();
        assert_eq!(db.earliest_snapshot_seq_num(), second.seq_num());

        drop(second);
        assert_eq!(db.snapshot_count(), 0);
        assert_eq!(db.statistics().snapshot().open_snapshots(), 0);
    }

    #[test]
    #[should_panic(expected = "snapshot already closed")]
    fn test_double_close_panics() {
        let db = DB::open(DbOptions::default()).unwrap();
        let mut snap = db.new_snapshot();
        snap.close().unwrap();
        snap.close().unwrap();
    }

    #[test]
    #[should_panic(expected = "snapshot already closed")]
    fn test_read_after_close_panics() {
        let db = DB::open(DbOptions::default()).unwrap();
        let mut snap = db.new_snapshot();
        snap.close().unwrap();
        let _ = snap.get(b"a");
    }
}
