use std::collections::HashSet;
use std::sync::Arc;

use crate::key::SeqNum;
use crate::statistics::Statistics;
use crate::util::{Result, Status};
use crate::version::version::Version;
use crate::version::version_edit::VersionEdit;

/// A counted reference to a [`Version`].
///
/// Move-only: every handle corresponds to exactly one increment of the
/// version's reference count. Dropping a handle without releasing it leaks
/// the reference and keeps the version's files alive.
#[must_use = "a version reference must be released"]
pub struct VersionRef {
    version: Arc<Version>,
}

impl VersionRef {
    pub(crate) fn acquire(version: &Arc<Version>) -> Self {
        version.incr_ref();
        VersionRef {
            version: Arc::clone(version),
        }
    }

    /// Takes another reference to the same version.
    pub fn clone_ref(&self) -> Self {
        VersionRef::acquire(&self.version)
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    /// Drops this reference. Returns the version if it was the last one;
    /// the caller must then hand it to
    /// [`VersionSet::version_unreferenced`] under the engine lock.
    pub(crate) fn unref(self) -> Option<Arc<Version>> {
        if self.version.decr_ref() {
            Some(self.version)
        } else {
            None
        }
    }

    /// Releases the reference while the engine lock is held.
    pub fn release_locked(self, versions: &mut VersionSet) {
        if let Some(version) = self.unref() {
            versions.version_unreferenced(&version);
        }
    }
}

impl std::fmt::Debug for VersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRef")
            .field("version", &self.version.id())
            .field("refs", &self.version.refs())
            .finish()
    }
}

/// VersionSet manages the chain of versions and applies edits
///
/// It maintains:
/// - Current version, referenced by the set itself
/// - Every version still referenced by a reader
/// - Next file number allocation
/// - Files dropped from every live version, awaiting deletion
pub struct VersionSet {
    current: Option<VersionRef>,
    live: Vec<Arc<Version>>,
    next_version_id: u64,
    next_file_number: u64,
    last_sequence: SeqNum,
    obsolete_files: Vec<u64>,
    statistics: Arc<Statistics>,
}

impl VersionSet {
    pub fn new(statistics: Arc<Statistics>) -> Self {
        let initial = Arc::new(Version::new(1, Arc::clone(&statistics)));
        let current = VersionRef::acquire(&initial);
        VersionSet {
            current: Some(current),
            live: vec![initial],
            next_version_id: 2,
            next_file_number: 1,
            last_sequence: 0,
            obsolete_files: Vec::new(),
            statistics,
        }
    }

    pub fn current(&self) -> &Arc<Version> {
        match &self.current {
            Some(current) => current.version(),
            None => unreachable!("version set always has a current version"),
        }
    }

    /// Takes a new reference to the current version.
    pub fn acquire_current(&self) -> VersionRef {
        VersionRef::acquire(self.current())
    }

    /// Allocate a new file number
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    pub fn last_sequence(&self) -> SeqNum {
        self.last_sequence
    }

    /// Apply a VersionEdit and install the result as the current version
    pub fn log_and_apply(&mut self, edit: VersionEdit) -> Result<()> {
        let current = Arc::clone(self.current());

        for (level, number) in &edit.deleted_files {
            let present = current
                .get_level_files(*level)
                .iter()
                .any(|f| f.number == *number);
            if !present {
                return Err(Status::corruption(format!(
                    "version edit deletes missing file {number} at level {level}"
                )));
            }
        }

        let mut new_version = Version::new(self.next_version_id, Arc::clone(&self.statistics));
        self.next_version_id += 1;
        for (level, files) in current.files.iter().enumerate() {
            for file in files {
                new_version.add_file(level, Arc::clone(file));
            }
        }
        for (level, number) in &edit.deleted_files {
            new_version.remove_file(*level, *number);
        }
        for (level, file) in &edit.new_files {
            new_version.add_file(*level, Arc::clone(file));
        }
        if let Some(seq) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(seq);
        }

        log::debug!(
            "installing version {}: +{} -{} files",
            new_version.id(),
            edit.new_files.len(),
            edit.deleted_files.len()
        );

        let new_version = Arc::new(new_version);
        self.live.push(Arc::clone(&new_version));
        let new_ref = VersionRef::acquire(&new_version);
        if let Some(old) = self.current.replace(new_ref) {
            old.release_locked(self);
        }
        Ok(())
    }

    /// Retires a version whose last reference was dropped. Files that no
    /// live version contains become obsolete.
    pub fn version_unreferenced(&mut self, version: &Arc<Version>) {
        let before = self.live.len();
        self.live.retain(|v| !Arc::ptr_eq(v, version));
        if self.live.len() == before {
            return;
        }

        let still_live: HashSet<u64> = self
            .live
            .iter()
            .flat_map(|v| v.file_numbers().collect::<Vec<_>>())
            .collect();
        for number in version.file_numbers() {
            if !still_live.contains(&number) && !self.obsolete_files.contains(&number) {
                self.obsolete_files.push(number);
            }
        }
        log::trace!(
            "version {} unreferenced, {} obsolete files pending",
            version.id(),
            self.obsolete_files.len()
        );
    }

    /// Number of versions that are current or still referenced.
    pub fn num_live_versions(&self) -> usize {
        self.live.len()
    }

    pub fn live_file_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self
            .live
            .iter()
            .flat_map(|v| v.file_numbers().collect::<Vec<_>>())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn obsolete_file_count(&self) -> usize {
        self.obsolete_files.len()
    }

    pub fn take_obsolete_files(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.obsolete_files)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::key::{InternalKey, InternalKeyKind};
    use crate::version::{FileMetaData, Table};

    fn table(key: &'static str, seq: SeqNum) -> Table {
        Table::new(
            vec![(InternalKey::new(key, seq, InternalKeyKind::Set), Bytes::from("v"))],
            vec![],
            vec![],
        )
    }

    fn version_set() -> VersionSet {
        VersionSet::new(Arc::new(Statistics::new()))
    }

    #[test]
    fn test_version_set_new() {
        let vs = version_set();
        assert_eq!(vs.current().num_files(), 0);
        assert_eq!(vs.current().refs(), 1);
        assert_eq!(vs.num_live_versions(), 1);
    }

    #[test]
    fn test_version_set_log_and_apply() {
        let mut vs = version_set();
        let number = vs.new_file_number();
        let mut edit = VersionEdit::new();
        edit.add_file(0, FileMetaData::from_table(number, table("a", 1)).unwrap());
        edit.set_last_sequence(1);
        vs.log_and_apply(edit).unwrap();

        assert_eq!(vs.current().num_level_files(0), 1);
        assert_eq!(vs.last_sequence(), 1);
        // The old version had no readers and was retired.
        assert_eq!(vs.num_live_versions(), 1);
    }

    #[test]
    fn test_delete_missing_file_is_corruption() {
        let mut vs = version_set();
        let mut edit = VersionEdit::new();
        edit.delete_file(0, 42);
        let err = vs.log_and_apply(edit).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_referenced_version_keeps_files_alive() {
        let mut vs = version_set();
        let number = vs.new_file_number();
        let mut edit = VersionEdit::new();
        edit.add_file(0, FileMetaData::from_table(number, table("a", 1)).unwrap());
        vs.log_and_apply(edit).unwrap();

        let pinned = vs.acquire_current();

        let mut edit = VersionEdit::new();
        edit.delete_file(0, number);
        vs.log_and_apply(edit).unwrap();

        assert_eq!(vs.num_live_versions(), 2);
        assert_eq!(vs.live_file_numbers(), vec![number]);
        assert_eq!(vs.obsolete_file_count(), 0);

        pinned.release_locked(&mut vs);
        assert_eq!(vs.num_live_versions(), 1);
        assert_eq!(vs.take_obsolete_files(), vec![number]);
        assert!(vs.live_file_numbers().is_empty());
    }

    #[test]
    fn test_file_number_allocation() {
        let mut vs = version_set();
        assert_eq!(vs.new_file_number(), 1);
        assert_eq!(vs.new_file_number(), 2);
    }

    #[test]
    fn test_clone_ref_counts() {
        let mut vs = version_set();
        let a = vs.acquire_current();
        let b = a.clone_ref();
        assert_eq!(vs.current().refs(), 3);
        a.release_locked(&mut vs);
        b.release_locked(&mut vs);
        assert_eq!(vs.current().refs(), 1);
    }
}
