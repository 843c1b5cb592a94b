use std::sync::Arc;

use bytes::Bytes;

use crate::key::SeqNum;
use crate::version::table::Table;

/// Maximum number of levels in the LSM tree
pub const NUM_LEVELS: usize = 7;

/// Levels at or below this one live on shared storage when shared storage is
/// configured.
pub const SHARED_LEVELS_START: usize = 5;

/// Metadata for a single file
#[derive(Debug, Clone)]
pub struct FileMetaData {
    /// File number, unique for the lifetime of the engine
    pub number: u64,
    /// Approximate file size in bytes
    pub file_size: u64,
    /// Smallest user key in this file
    pub smallest: Bytes,
    /// Largest user key in this file (inclusive)
    pub largest: Bytes,
    pub smallest_seq_num: SeqNum,
    pub largest_seq_num: SeqNum,
    /// The file contents
    pub table: Arc<Table>,
}

impl FileMetaData {
    /// Wraps a table as file `number`. Returns `None` for an empty table.
    pub fn from_table(number: u64, table: Table) -> Option<Self> {
        let (smallest, largest) = table.bounds()?;
        let (smallest_seq_num, largest_seq_num) = table.seq_num_bounds()?;
        Some(FileMetaData {
            number,
            file_size: table.approximate_size(),
            smallest,
            largest,
            smallest_seq_num,
            largest_seq_num,
            table: Arc::new(table),
        })
    }

    /// Whether a rewrite of this file could drop anything once every
    /// snapshot is above `floor`.
    pub fn has_elision_candidates(&self, floor: SeqNum) -> bool {
        self.smallest_seq_num < floor
            && (self.table.num_deletions() > 0 || self.table.num_superseded() > 0)
    }
}

/// A VersionEdit represents the changes between two versions
/// It records which files were added and deleted at each level
#[derive(Debug, Default)]
pub struct VersionEdit {
    /// Last sequence number covered by the edit
    pub last_sequence: Option<SeqNum>,
    /// Files to delete: (level, file_number)
    pub deleted_files: Vec<(usize, u64)>,
    /// Files to add: (level, file_metadata)
    pub new_files: Vec<(usize, Arc<FileMetaData>)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        VersionEdit::default()
    }

    pub fn set_last_sequence(&mut self, seq: SeqNum) {
        self.last_sequence = Some(seq);
    }

    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, Arc::new(file)));
    }

    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.push((level, file_number));
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_files.is_empty() && self.new_files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, InternalKeyKind};

    #[test]
    fn test_file_metadata_from_table() {
        let table = Table::new(
            vec![
                (InternalKey::new("a", 4, InternalKeyKind::Set), Bytes::from("1")),
                (InternalKey::new("k", 2, InternalKeyKind::Delete), Bytes::new()),
            ],
            vec![],
            vec![],
        );
        let file = FileMetaData::from_table(7, table).unwrap();
        assert_eq!(file.number, 7);
        assert_eq!(file.smallest, Bytes::from("a"));
        assert_eq!(file.largest, Bytes::from("k"));
        assert_eq!((file.smallest_seq_num, file.largest_seq_num), (2, 4));
        assert!(file.has_elision_candidates(3));
        assert!(!file.has_elision_candidates(2));
    }

    #[test]
    fn test_empty_table_yields_no_file() {
        assert!(FileMetaData::from_table(1, Table::default()).is_none());
    }

    #[test]
    fn test_version_edit() {
        let mut edit = VersionEdit::new();
        assert!(edit.is_empty());
        edit.delete_file(0, 3);
        edit.set_last_sequence(9);
        assert!(!edit.is_empty());
        assert_eq!(edit.deleted_files, vec![(0, 3)]);
        assert_eq!(edit.last_sequence, Some(9));
    }
}
