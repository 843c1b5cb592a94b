use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::{
    db::{DbInner, DbState, IterOptions, PinnedSource, ReadPin, ReadStateRef},
    iterator::{DbIter, ScanInternalVisitor},
    key::{KeyRange, SeqNum},
    snapshot::Snapshot,
    util::{Result, Status},
    version::VersionRef,
};

/// The resources an eventually file-only snapshot pins. Exactly one phase
/// is live at a time.
enum EfosPhase {
    /// Protected data may still sit in memtables. `read_state` is released
    /// early when an excise hits the protected ranges.
    MemtablePinned {
        snap: Snapshot,
        read_state: Option<ReadStateRef>,
    },
    /// Every protected key at or below the sequence number is in files.
    FileOnly { vers: VersionRef },
    Closed,
}

pub(crate) struct EfosInner {
    db: Arc<DbInner>,
    seq_num: SeqNum,
    protected_ranges: Vec<KeyRange>,
    /// Set at most once, never cleared
    excised: AtomicBool,
    /// Latched first thing in `close`
    closed: AtomicBool,
    mu: Mutex<EfosPhase>,
    /// Signalled on every phase change
    transitioned: Condvar,
}

impl EfosInner {
    pub(crate) fn seq_num(&self) -> SeqNum {
        self.seq_num
    }

    pub(crate) fn is_excised(&self) -> bool {
        self.excised.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_file_only(&self) -> bool {
        matches!(*self.mu.lock(), EfosPhase::FileOnly { .. })
    }

    /// Whether any protected range overlaps one of `ranges`.
    pub(crate) fn overlaps(&self, ranges: &[KeyRange]) -> bool {
        self.protected_ranges
            .iter()
            .any(|p| ranges.iter().any(|r| p.overlaps(&r.start, &r.end)))
    }

    /// Swaps the memtable-pinned resources for `vers`, which the caller has
    /// already acquired. Called by the flush path with the engine lock held.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot is already file-only.
    pub(crate) fn transition_to_file_only_snapshot(
        &self,
        state: &mut DbState,
        vers: VersionRef,
    ) -> Result<()> {
        let mut phase = self.mu.lock();
        if self.is_closed() {
            drop(phase);
            vers.release_locked(&mut state.versions);
            return Err(Status::closed());
        }
        if !matches!(*phase, EfosPhase::MemtablePinned { .. }) {
            panic!("tried to transition an eventually file-only snapshot twice");
        }

        let old = std::mem::replace(&mut *phase, EfosPhase::FileOnly { vers });
        self.transitioned.notify_all();
        drop(phase);

        let EfosPhase::MemtablePinned { mut snap, read_state } = old else {
            unreachable!("phase checked above");
        };
        if let Some(read_state) = read_state {
            read_state.release_locked(&mut state.versions);
        }
        self.db.statistics.record_efos_transition();
        log::debug!(
            "eventually file-only snapshot at seq {} is now file-only",
            self.seq_num
        );
        snap.close_locked(state)
    }

    /// Sets the excised flag. Only the first call has an effect.
    pub(crate) fn mark_excised(&self) {
        if !self.excised.swap(true, Ordering::AcqRel) {
            self.db.statistics.record_efos_excised();
            log::debug!(
                "eventually file-only snapshot at seq {} was excised",
                self.seq_num
            );
        }
    }

    /// Drops the read state reference of an excised snapshot ahead of
    /// close. Calling it again is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot was not marked excised.
    pub(crate) fn release_read_state(&self, state: &mut DbState) {
        if !self.is_excised() {
            panic!("releasing read state of eventually file-only snapshot that was not excised");
        }
        let mut phase = self.mu.lock();
        let released = match &mut *phase {
            EfosPhase::MemtablePinned { read_state, .. } => read_state.take(),
            _ => None,
        };
        self.transitioned.notify_all();
        drop(phase);

        if let Some(read_state) = released {
            read_state.release_locked(&mut state.versions);
            self.db.maybe_schedule_obsolete_file_deletion(state);
        }
    }

    fn wait_for_file_only_snapshot(&self, delay: Duration) -> Result<()> {
        if self.is_file_only() {
            return Ok(());
        }

        let db = &self.db;
        let mut state = db.mu.lock();
        while db.earliest_unflushed_seq_num(&state) <= self.seq_num {
            if self.is_closed() {
                return Err(Status::closed());
            }
            if self.is_excised() {
                break;
            }
            if let Some(err) = &state.bg_error {
                return Err(err.clone());
            }

            let mutable = Arc::clone(state.mem.mutable());
            if mutable.log_seq_num() <= self.seq_num && !mutable.is_empty() {
                if delay.is_zero() {
                    db.rotate_memtable(&mut state);
                    db.maybe_schedule_flush(&mut state);
                } else {
                    db.maybe_schedule_delayed_flush(&mutable, delay);
                }
            } else {
                db.maybe_schedule_flush(&mut state);
            }
            db.compact_cond.wait(&mut state);
        }
        if self.is_excised() {
            return Err(Status::excised());
        }
        drop(state);

        let mut phase = self.mu.lock();
        loop {
            match &*phase {
                EfosPhase::FileOnly { .. } => return Ok(()),
                EfosPhase::Closed => return Err(Status::closed()),
                EfosPhase::MemtablePinned { .. } => {},
            }
            if self.is_excised() {
                return Err(Status::excised());
            }
            self.transitioned.wait(&mut phase);
        }
    }

    /// Pins whichever resources are live. Memtable-pinned reads are
    /// rejected once excised.
    fn pin(&self) -> Result<ReadPin> {
        let phase = self.mu.lock();
        let source = match &*phase {
            EfosPhase::MemtablePinned { read_state, .. } => match read_state {
                Some(rs) if !self.is_excised() => PinnedSource::ReadState(rs.clone_ref()),
                _ => return Err(Status::excised()),
            },
            EfosPhase::FileOnly { vers } => PinnedSource::Version(vers.clone_ref()),
            EfosPhase::Closed => panic!("eventually file-only snapshot already closed"),
        };
        drop(phase);
        Ok(ReadPin::new(Arc::clone(&self.db), source))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            panic!("eventually file-only snapshot already closed");
        }

        let db = &self.db;
        let mut state = db.mu.lock();
        db.compact_cond.notify_all();

        let mut phase = self.mu.lock();
        let old = std::mem::replace(&mut *phase, EfosPhase::Closed);
        self.transitioned.notify_all();
        drop(phase);

        let result = match old {
            EfosPhase::MemtablePinned { mut snap, read_state } => {
                if let Some(read_state) = read_state {
                    read_state.release_locked(&mut state.versions);
                    db.maybe_schedule_obsolete_file_deletion(&mut state);
                }
                snap.close_locked(&mut state)
            }
            EfosPhase::FileOnly { vers } => {
                vers.release_locked(&mut state.versions);
                db.maybe_schedule_obsolete_file_deletion(&mut state);
                Ok(())
            }
            EfosPhase::Closed => unreachable!("closed latch guards the phase"),
        };
        db.statistics.record_efos_closed();
        log::debug!("closed eventually file-only snapshot at seq {}", self.seq_num);
        result
    }
}

/// A snapshot that starts out pinning memtables like a regular [`Snapshot`]
/// and becomes a file-only snapshot, pinning only a version, once every
/// memtable holding data at or below its sequence number has been flushed.
///
/// Only reads inside the protected key ranges are guaranteed to be
/// consistent. If an excise overlaps a protected range before the snapshot
/// becomes file-only, the snapshot is marked excised: waiting for the
/// transition and memtable-pinned reads then fail with
/// [`Code::Excised`](crate::Code::Excised), and the caller should create a
/// new snapshot if it still needs one.
///
/// Closing twice panics. A snapshot that is never closed is closed on drop.
pub struct EventuallyFileOnlySnapshot {
    inner: Arc<EfosInner>,
}

impl EventuallyFileOnlySnapshot {
    pub(crate) fn new(db: &Arc<DbInner>, ranges: &[KeyRange]) -> Self {
        let mut state = db.mu.lock();
        let seq_num = db.visible_seq_num();
        let file_only = !state.mem.overlaps(ranges);

        let new_inner = |phase: EfosPhase| EfosInner {
            db: Arc::clone(db),
            seq_num,
            protected_ranges: ranges.to_vec(),
            excised: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            mu: Mutex::new(phase),
            transitioned: Condvar::new(),
        };
        let inner = if file_only {
            let vers = state.versions.acquire_current();
            Arc::new(new_inner(EfosPhase::FileOnly { vers }))
        } else {
            Arc::new_cyclic(|weak| {
                let snap = Snapshot::new_locked(db, &mut state, seq_num, Some(weak.clone()));
                let read_state = state.read_state().clone_ref();
                new_inner(EfosPhase::MemtablePinned {
                    snap,
                    read_state: Some(read_state),
                })
            })
        };
        drop(state);

        db.statistics.record_efos_created(file_only);
        log::debug!(
            "created eventually file-only snapshot at seq {} over {} ranges (file-only: {})",
            seq_num,
            ranges.len(),
            file_only
        );
        EventuallyFileOnlySnapshot { inner }
    }

    pub fn seq_num(&self) -> SeqNum {
        self.inner.seq_num
    }

    pub fn protected_ranges(&self) -> &[KeyRange] {
        &self.inner.protected_ranges
    }

    pub fn is_file_only(&self) -> bool {
        self.inner.is_file_only()
    }

    pub fn is_excised(&self) -> bool {
        self.inner.is_excised()
    }

    /// Blocks until the snapshot is file-only.
    ///
    /// A nonzero `delay` schedules a flush of the mutable memtable after
    /// that delay if it holds data the snapshot pins; with a zero delay it
    /// is flushed right away. Returns [`Status::excised`] if an excise
    /// preempted the transition and [`Status::closed`] if the snapshot was
    /// closed while waiting. Returns immediately once file-only.
    pub fn wait_for_file_only_snapshot(&self, delay: Duration) -> Result<()> {
        self.inner.wait_for_file_only_snapshot(delay)
    }

    /// Point lookup as of this snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let pin = self.inner.pin()?;
        self.inner.db.get_pinned(&pin, key, self.inner.seq_num)
    }

    /// Unpositioned iterator over the data visible to this snapshot.
    pub fn new_iter(&self, options: &IterOptions) -> Result<DbIter> {
        let pin = self.inner.pin()?;
        Ok(self.inner.db.new_iter_pinned(pin, self.inner.seq_num, options))
    }

    /// Visits every internal key, range deletion and range key visible to
    /// this snapshot. Fails once excised, whatever the phase.
    pub fn scan_internal(
        &self,
        options: &IterOptions,
        visitor: &mut dyn ScanInternalVisitor,
    ) -> Result<()> {
        if self.inner.is_excised() {
            return Err(Status::excised());
        }
        let pin = self.inner.pin()?;
        self.inner
            .db
            .scan_internal_pinned(&pin, self.inner.seq_num, options, visitor)
    }

    /// Releases whatever the snapshot pins.
    ///
    /// May be called while another thread waits in
    /// [`wait_for_file_only_snapshot`](Self::wait_for_file_only_snapshot);
    /// the waiter returns [`Status::closed`].
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for EventuallyFileOnlySnapshot {
    fn drop(&mut self) {
        if !self.inner.is_closed()
            && let Err(err) = self.inner.close()
        {
            log::warn!(
                "failed to close eventually file-only snapshot at seq {}: {err}",
                self.inner.seq_num
            );
        }
    }
}

impl std::fmt::Debug for EventuallyFileOnlySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventuallyFileOnlySnapshot")
            .field("seq_num", &self.inner.seq_num)
            .field("protected_ranges", &self.inner.protected_ranges)
            .field("excised", &self.inner.is_excised())
            .finish()
    }
}
