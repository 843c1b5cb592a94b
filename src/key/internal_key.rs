use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

/// Sequence number identifying a point in the write history.
pub type SeqNum = u64;

/// Sentinel sequence number; the earliest pinned sequence number of an empty
/// snapshot registry.
pub const SEQ_NUM_MAX: SeqNum = u64::MAX;

/// Kind of an internal key.
///
/// The discriminant participates in ordering: for equal user key and
/// sequence number, larger kinds sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum InternalKeyKind {
    Delete = 0,
    Set = 1,
    RangeDelete = 15,
    RangeKeyDelete = 19,
    RangeKeyUnset = 20,
    RangeKeySet = 21,
}

impl InternalKeyKind {
    pub fn is_point(self) -> bool {
        matches!(self, InternalKeyKind::Delete | InternalKeyKind::Set)
    }

    pub fn is_range_key(self) -> bool {
        matches!(
            self,
            InternalKeyKind::RangeKeySet
                | InternalKeyKind::RangeKeyUnset
                | InternalKeyKind::RangeKeyDelete
        )
    }
}

/// A user key tagged with the sequence number and kind of the write that
/// produced it.
///
/// Ordered by user key ascending, then sequence number descending, so that
/// the newest version of a user key is encountered first when scanning
/// forward.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    user_key: Bytes,
    seq_num: SeqNum,
    kind: InternalKeyKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Bytes>, seq_num: SeqNum, kind: InternalKeyKind) -> Self {
        InternalKey {
            user_key: user_key.into(),
            seq_num,
            kind,
        }
    }

    /// The smallest internal key with the given user key.
    pub fn seek_key(user_key: &[u8]) -> Self {
        InternalKey::new(
            Bytes::copy_from_slice(user_key),
            SEQ_NUM_MAX,
            InternalKeyKind::RangeKeySet,
        )
    }

    /// The largest internal key with the given user key.
    pub fn seek_for_prev_key(user_key: &[u8]) -> Self {
        InternalKey::new(Bytes::copy_from_slice(user_key), 0, InternalKeyKind::Delete)
    }

    pub fn user_key(&self) -> &Bytes {
        &self.user_key
    }

    pub fn seq_num(&self) -> SeqNum {
        self.seq_num
    }

    pub fn kind(&self) -> InternalKeyKind {
        self.kind
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == InternalKeyKind::Delete
    }

    /// Whether a read view at `seq_num` observes this key.
    #[inline]
    pub fn visible_at(&self, seq_num: SeqNum) -> bool {
        self.seq_num <= seq_num
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seq_num.cmp(&self.seq_num))
            .then_with(|| other.kind.cmp(&self.kind))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.user_key) {
            Ok(s) => write!(f, "{s}#{},{:?}", self.seq_num, self.kind),
            Err(_) => write!(f, "{:?}#{},{:?}", self.user_key, self.seq_num, self.kind),
        }
    }
}
