use bytes::Bytes;

use crate::key::internal_key::{InternalKeyKind, SeqNum};

/// Half-open user key range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub start: Bytes,
    pub end: Bytes,
}

impl KeyRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        KeyRange {
            start: start.into(),
            end: end.into(),
        }
    }

    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_ref() <= key && key < self.end.as_ref()
    }

    /// Overlap with another half-open range.
    #[inline]
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.start.as_ref() < end && start < self.end.as_ref()
    }

    /// Overlap with an inclusive `[smallest, largest]` bound, as recorded for
    /// files.
    #[inline]
    pub fn overlaps_inclusive(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.start.as_ref() <= largest && smallest < self.end.as_ref()
    }
}

/// A range deletion: every point key in `[start, end)` with a sequence
/// number below `seq_num` is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Bytes,
    pub end: Bytes,
    pub seq_num: SeqNum,
}

impl RangeTombstone {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>, seq_num: SeqNum) -> Self {
        RangeTombstone {
            start: start.into(),
            end: end.into(),
            seq_num,
        }
    }

    /// Whether the tombstone deletes a point write of `key` at `seq_num`.
    #[inline]
    pub fn covers(&self, key: &[u8], seq_num: SeqNum) -> bool {
        seq_num < self.seq_num && self.start.as_ref() <= key && key < self.end.as_ref()
    }
}

/// A single range key carried by a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKey {
    pub seq_num: SeqNum,
    pub kind: InternalKeyKind,
    pub suffix: Bytes,
    pub value: Bytes,
}

/// A range key over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKeySpan {
    pub start: Bytes,
    pub end: Bytes,
    pub key: RangeKey,
}
