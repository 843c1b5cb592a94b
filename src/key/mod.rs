mod internal_key;
mod span;

pub use internal_key::{InternalKey, InternalKeyKind, SEQ_NUM_MAX, SeqNum};
pub use span::{KeyRange, RangeKey, RangeKeySpan, RangeTombstone};
