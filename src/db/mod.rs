mod compaction;
#[allow(clippy::module_inception)]
mod db;
mod excise;
mod flush;
pub mod options;
mod read_state;
pub mod write_batch;

pub use db::DB;
pub(crate) use db::{DbInner, DbState, ReadPin};
pub use options::{DbOptions, IterOptions};
pub(crate) use read_state::PinnedSource;
pub use read_state::{ReadState, ReadStateRef, ReadView};
pub use write_batch::{WriteBatch, WriteOp};
