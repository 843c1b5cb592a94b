//! Point-in-time read views over an in-memory LSM engine.
//!
//! [`Snapshot`] pins a sequence number and keeps every version it can see
//! alive until closed. [`EventuallyFileOnlySnapshot`] starts out the same
//! way but releases the memtables it pins once they are flushed, after
//! which it holds only a reference to the set of files it reads.

pub mod db;
pub mod iterator;
pub mod key;
pub mod memtable;
pub mod snapshot;
pub mod statistics;
pub mod util;
pub mod version;

pub use db::{DB, DbOptions, IterOptions, WriteBatch};
pub use iterator::{DbIter, Iterator, IteratorLevel, ScanInternalVisitor, SharedFileMeta};
pub use key::{InternalKey, InternalKeyKind, KeyRange, RangeKey, SEQ_NUM_MAX, SeqNum};
pub use snapshot::{EventuallyFileOnlySnapshot, Snapshot};
pub use statistics::{Statistics, StatisticsSnapshot};
pub use util::{Code, Result, Status};
