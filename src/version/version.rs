use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    statistics::Statistics,
    version::version_edit::{FileMetaData, NUM_LEVELS},
};

/// A Version represents a snapshot of all files organized by levels
///
/// Level 0: files may have overlapping keys (from memtable flush), newest
/// last
/// Level 1+: files have non-overlapping keys, sorted by smallest key
///
/// A version is immutable once installed. Its reference count is managed
/// through [`VersionRef`](crate::version::VersionRef) handles.
pub struct Version {
    id: u64,
    /// Files at each level
    pub files: Vec<Vec<Arc<FileMetaData>>>,
    refs: AtomicUsize,
    statistics: Arc<Statistics>,
}

impl Version {
    pub fn new(id: u64, statistics: Arc<Statistics>) -> Self {
        Version {
            id,
            files: vec![Vec::new(); NUM_LEVELS],
            refs: AtomicUsize::new(0),
            statistics,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current reference count
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn incr_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.statistics.record_version_ref_acquired();
    }

    /// Returns true when the last reference was dropped.
    pub(crate) fn decr_ref(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "version {} reference count underflow", self.id);
        self.statistics.record_version_ref_released();
        prev == 1
    }

    /// Get total number of files across all levels
    pub fn num_files(&self) -> usize {
        self.files.iter().map(|level| level.len()).sum()
    }

    /// Get number of files at a specific level
    pub fn num_level_files(&self, level: usize) -> usize {
        if level < NUM_LEVELS {
            self.files[level].len()
        } else {
            0
        }
    }

    /// Get files at a specific level
    pub fn get_level_files(&self, level: usize) -> &[Arc<FileMetaData>] {
        if level < NUM_LEVELS {
            &self.files[level]
        } else {
            &[]
        }
    }

    /// Add file to a level
    pub fn add_file(&mut self, level: usize, file: Arc<FileMetaData>) {
        if level < NUM_LEVELS {
            self.files[level].push(file);
            // Sort files at level 1+ by smallest key
            if level > 0 {
                self.files[level].sort_by(|a, b| a.smallest.cmp(&b.smallest));
            }
        }
    }

    /// Remove file from a level
    pub fn remove_file(&mut self, level: usize, file_number: u64) {
        if level < NUM_LEVELS {
            self.files[level].retain(|f| f.number != file_number);
        }
    }

    pub fn contains_file(&self, file_number: u64) -> bool {
        self.files
            .iter()
            .any(|level| level.iter().any(|f| f.number == file_number))
    }

    pub fn file_numbers(&self) -> impl std::iter::Iterator<Item = u64> + '_ {
        self.files.iter().flatten().map(|f| f.number)
    }

    /// Files at `level` whose inclusive key range intersects
    /// `[smallest, largest]`.
    pub fn get_overlapping_files(
        &self,
        level: usize,
        smallest: &[u8],
        largest: &[u8],
    ) -> Vec<Arc<FileMetaData>> {
        self.get_level_files(level)
            .iter()
            .filter(|f| Self::key_range_overlaps(smallest, largest, &f.smallest, &f.largest))
            .cloned()
            .collect()
    }

    /// Check if two key ranges overlap
    fn key_range_overlaps(
        a_smallest: &[u8],
        a_largest: &[u8],
        b_smallest: &[u8],
        b_largest: &[u8],
    ) -> bool {
        // Ranges overlap if they're not disjoint
        !(a_largest < b_smallest || b_largest < a_smallest)
    }

    /// Pick level for compaction based on level sizes
    pub fn pick_compaction_level(&self, l0_trigger: usize) -> Option<usize> {
        // Level 1: 10 MB, level 2+: 10x previous level
        const LEVEL1_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

        if self.files[0].len() >= l0_trigger {
            return Some(0);
        }

        let mut size_limit = LEVEL1_SIZE_LIMIT;
        for level in 1..NUM_LEVELS - 1 {
            let level_size: u64 = self.files[level].iter().map(|f| f.file_size).sum();
            if level_size > size_limit {
                return Some(level);
            }
            size_limit *= 10;
        }

        None
    }
}
