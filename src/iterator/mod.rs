//! Cursors over memtables and files.
//!
//! ```text
//! DbIter (user keys, sequence filtering, range deletions, bounds)
//!     ↓
//! MergingIterator (internal keys)
//!     ├─→ MemTableIterator (newest)
//!     ├─→ ...
//!     └─→ [TableIterator, TableIterator, ...] (oldest)
//! ```
//!
//! Internal iterators surface every version of every key, tombstones
//! included, in [`InternalKey`] order. [`DbIter`] collapses them to the
//! newest version visible at its sequence number.

use bytes::Bytes;

use crate::key::InternalKey;
use crate::util::Result;

/// Cursor over the user keys visible to a read view, in ascending order.
///
/// Positioning methods return whether the cursor landed on an entry. A
/// fresh iterator is unpositioned:
///
/// ```ignore
/// let mut iter = snapshot.new_iter(&IterOptions::default())?;
/// let mut valid = iter.seek_to_first()?;
/// while valid {
///     println!("{:?} = {:?}", iter.key(), iter.value());
///     valid = iter.next()?;
/// }
/// ```
///
/// `next`, `prev`, `key` and `value` require a positioned iterator.
pub trait Iterator {
    fn seek_to_first(&mut self) -> Result<bool>;

    fn seek_to_last(&mut self) -> Result<bool>;

    /// Lands on the smallest visible key at or after `target`.
    fn seek(&mut self, target: &[u8]) -> Result<bool>;

    /// Lands on the largest visible key at or before `target`.
    fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool>;

    fn next(&mut self) -> Result<bool>;

    fn prev(&mut self) -> Result<bool>;

    fn key(&self) -> Bytes;

    fn value(&self) -> Bytes;

    fn valid(&self) -> bool;
}

/// Iterator over internal keys of a single source or a merge of sources.
pub trait InternalIterator: Send {
    fn seek_to_first(&mut self) -> Result<bool>;

    fn seek_to_last(&mut self) -> Result<bool>;

    /// Position at the first entry >= target
    fn seek(&mut self, target: &InternalKey) -> Result<bool>;

    /// Position at the last entry <= target
    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool>;

    fn next(&mut self) -> Result<bool>;

    fn prev(&mut self) -> Result<bool>;

    /// Prerequisite: valid() == true
    fn key(&self) -> &InternalKey;

    /// Prerequisite: valid() == true
    fn value(&self) -> &Bytes;

    fn valid(&self) -> bool;
}

mod db_iterator;
pub mod keyspan;
mod memtable_iterator;
mod merging_iterator;
pub mod scan_internal;
mod table_iterator;

pub use db_iterator::DbIter;
pub use memtable_iterator::MemTableIterator;
pub use merging_iterator::MergingIterator;
pub use scan_internal::{IteratorLevel, ScanInternalVisitor, SharedFileMeta};
pub use table_iterator::TableIterator;
