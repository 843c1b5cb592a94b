#[allow(clippy::module_inception)]
pub mod memtable;
pub mod queue;

pub use memtable::MemTable;
pub use queue::MemTableQueue;
