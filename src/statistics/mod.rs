use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide statistics
///
/// Thread-safe lifecycle accounting for snapshots and the resources they
/// pin. Uses atomic counters for lock-free updates.
#[derive(Debug, Default)]
pub struct Statistics {
    // Snapshot lifecycle
    pub snapshots_opened: AtomicU64,
    pub snapshots_closed: AtomicU64,
    pub efos_created_file_only: AtomicU64,
    pub efos_created_memtable_pinned: AtomicU64,
    pub efos_transitions: AtomicU64,
    pub efos_excised: AtomicU64,
    pub efos_closed: AtomicU64,

    // Reference counts
    pub version_refs_acquired: AtomicU64,
    pub version_refs_released: AtomicU64,
    pub read_state_refs_acquired: AtomicU64,
    pub read_state_refs_released: AtomicU64,

    // Background work
    pub num_memtable_flushes: AtomicU64,
    pub bytes_flushed: AtomicU64,
    pub delayed_flushes_scheduled: AtomicU64,
    pub num_compactions: AtomicU64,
    pub elision_only_compactions_scheduled: AtomicU64,
    pub num_elision_only_compactions: AtomicU64,
    pub obsolete_files_deleted: AtomicU64,
    pub num_excises: AtomicU64,

    // Error counts
    pub num_background_errors: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    #[inline]
    pub fn record_snapshot_opened(&self) {
        self.snapshots_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_closed(&self) {
        self.snapshots_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_efos_created(&self, file_only: bool) {
        if file_only {
            self.efos_created_file_only.fetch_add(1, Ordering::Relaxed);
        } else {
            self.efos_created_memtable_pinned.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_efos_transition(&self) {
        self.efos_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_efos_excised(&self) {
        self.efos_excised.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_efos_closed(&self) {
        self.efos_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_version_ref_acquired(&self) {
        self.version_refs_acquired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_version_ref_released(&self) {
        self.version_refs_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_state_ref_acquired(&self) {
        self.read_state_refs_acquired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_state_ref_released(&self) {
        self.read_state_refs_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_memtable_flush(&self, bytes: u64) {
        self.num_memtable_flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delayed_flush_scheduled(&self) {
        self.delayed_flushes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_compaction(&self) {
        self.num_compactions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_elision_only_scheduled(&self) {
        self.elision_only_compactions_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_elision_only_compaction(&self) {
        self.num_elision_only_compactions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_obsolete_files_deleted(&self, n: u64) {
        self.obsolete_files_deleted.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_excise(&self) {
        self.num_excises.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_background_error(&self) {
        self.num_background_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            snapshots_opened: self.snapshots_opened.load(Ordering::Relaxed),
            snapshots_closed: self.snapshots_closed.load(Ordering::Relaxed),
            efos_created_file_only: self.efos_created_file_only.load(Ordering::Relaxed),
            efos_created_memtable_pinned: self
                .efos_created_memtable_pinned
                .load(Ordering::Relaxed),
            efos_transitions: self.efos_transitions.load(Ordering::Relaxed),
            efos_excised: self.efos_excised.load(Ordering::Relaxed),
            efos_closed: self.efos_closed.load(Ordering::Relaxed),
            version_refs_acquired: self.version_refs_acquired.load(Ordering::Relaxed),
            version_refs_released: self.version_refs_released.load(Ordering::Relaxed),
            read_state_refs_acquired: self.read_state_refs_acquired.load(Ordering::Relaxed),
            read_state_refs_released: self.read_state_refs_released.load(Ordering::Relaxed),
            num_memtable_flushes: self.num_memtable_flushes.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            delayed_flushes_scheduled: self.delayed_flushes_scheduled.load(Ordering::Relaxed),
            num_compactions: self.num_compactions.load(Ordering::Relaxed),
            elision_only_compactions_scheduled: self
                .elision_only_compactions_scheduled
                .load(Ordering::Relaxed),
            num_elision_only_compactions: self
                .num_elision_only_compactions
                .load(Ordering::Relaxed),
            obsolete_files_deleted: self.obsolete_files_deleted.load(Ordering::Relaxed),
            num_excises: self.num_excises.load(Ordering::Relaxed),
            num_background_errors: self.num_background_errors.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic copy of [`Statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub snapshots_opened: u64,
    pub snapshots_closed: u64,
    pub efos_created_file_only: u64,
    pub efos_created_memtable_pinned: u64,
    pub efos_transitions: u64,
    pub efos_excised: u64,
    pub efos_closed: u64,
    pub version_refs_acquired: u64,
    pub version_refs_released: u64,
    pub read_state_refs_acquired: u64,
    pub read_state_refs_released: u64,
    pub num_memtable_flushes: u64,
    pub bytes_flushed: u64,
    pub delayed_flushes_scheduled: u64,
    pub num_compactions: u64,
    pub elision_only_compactions_scheduled: u64,
    pub num_elision_only_compactions: u64,
    pub obsolete_files_deleted: u64,
    pub num_excises: u64,
    pub num_background_errors: u64,
}

impl StatisticsSnapshot {
    /// Version references currently held by anyone.
    pub fn outstanding_version_refs(&self) -> u64 {
        self.version_refs_acquired - self.version_refs_released
    }

    /// Read state references currently held by anyone.
    pub fn outstanding_read_state_refs(&self) -> u64 {
        self.read_state_refs_acquired - self.read_state_refs_released
    }

    /// Snapshots (including those wrapped by EFOSes) still registered.
    pub fn open_snapshots(&self) -> u64 {
        self.snapshots_opened - self.snapshots_closed
    }
}
