use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::key::{
    InternalKey, InternalKeyKind, KeyRange, RangeKey, RangeKeySpan, RangeTombstone, SeqNum,
};

/// Per-entry bookkeeping overhead counted towards the memory usage.
const ENTRY_OVERHEAD: usize = 16;

/// Payload of a range key stored in a memtable, keyed by its start key.
#[derive(Debug, Clone)]
pub(crate) struct RangeKeyValue {
    end: Bytes,
    suffix: Bytes,
    value: Bytes,
}

/// In-memory buffer of recent writes.
///
/// Point writes, range deletions and range keys live in three separate
/// skiplists keyed by [`InternalKey`]. Range deletions and range keys are
/// keyed by their start key; the end key travels in the value.
pub struct MemTable {
    id: u64,
    /// First sequence number this memtable may contain.
    log_seq_num: SeqNum,
    points: SkipMap<InternalKey, Bytes>,
    range_dels: SkipMap<InternalKey, Bytes>,
    range_keys: SkipMap<InternalKey, RangeKeyValue>,
    approximate_memory: AtomicUsize,
    delayed_flush_scheduled: AtomicBool,
}

impl MemTable {
    pub fn new(id: u64, log_seq_num: SeqNum) -> Self {
        MemTable {
            id,
            log_seq_num,
            points: SkipMap::new(),
            range_dels: SkipMap::new(),
            range_keys: SkipMap::new(),
            approximate_memory: AtomicUsize::new(0),
            delayed_flush_scheduled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn log_seq_num(&self) -> SeqNum {
        self.log_seq_num
    }

    pub fn set(&self, seq_num: SeqNum, key: Bytes, value: Bytes) {
        self.charge(key.len() + value.len());
        self.points
            .insert(InternalKey::new(key, seq_num, InternalKeyKind::Set), value);
    }

    pub fn delete(&self, seq_num: SeqNum, key: Bytes) {
        self.charge(key.len());
        self.points.insert(
            InternalKey::new(key, seq_num, InternalKeyKind::Delete),
            Bytes::new(),
        );
    }

    pub fn delete_range(&self, seq_num: SeqNum, start: Bytes, end: Bytes) {
        self.charge(start.len() + end.len());
        self.range_dels.insert(
            InternalKey::new(start, seq_num, InternalKeyKind::RangeDelete),
            end,
        );
    }

    pub fn add_range_key(
        &self,
        seq_num: SeqNum,
        kind: InternalKeyKind,
        start: Bytes,
        end: Bytes,
        suffix: Bytes,
        value: Bytes,
    ) {
        debug_assert!(kind.is_range_key());
        self.charge(start.len() + end.len() + suffix.len() + value.len());
        self.range_keys.insert(
            InternalKey::new(start, seq_num, kind),
            RangeKeyValue { end, suffix, value },
        );
    }

    fn charge(&self, bytes: usize) {
        self.approximate_memory
            .fetch_add(bytes + ENTRY_OVERHEAD, Ordering::Relaxed);
    }

    /// Newest point entry for `key` visible at `seq_num`, tombstones included.
    ///
    /// Range deletions are not applied here; the read path combines them
    /// across all sources.
    pub fn get(&self, key: &[u8], seq_num: SeqNum) -> Option<(InternalKey, Bytes)> {
        let start = InternalKey::new(Bytes::copy_from_slice(key), seq_num, InternalKeyKind::Set);
        let entry = self.points.range(start..).next()?;
        if entry.key().user_key().as_ref() != key {
            return None;
        }
        Some((entry.key().clone(), entry.value().clone()))
    }

    /// Whether any write in this memtable falls inside one of `ranges`.
    pub fn overlaps(&self, ranges: &[KeyRange]) -> bool {
        ranges.iter().any(|range| {
            let lower = InternalKey::seek_key(&range.start);
            let point_hit = self
                .points
                .range(lower..)
                .next()
                .is_some_and(|e| e.key().user_key().as_ref() < range.end.as_ref());
            if point_hit {
                return true;
            }
            let del_hit = self
                .range_dels
                .iter()
                .any(|e| range.overlaps(e.key().user_key(), e.value()));
            if del_hit {
                return true;
            }
            self.range_keys
                .iter()
                .any(|e| range.overlaps(e.key().user_key(), &e.value().end))
        })
    }

    pub(crate) fn points(&self) -> &SkipMap<InternalKey, Bytes> {
        &self.points
    }

    /// First point entry strictly after `key` (or the first entry overall).
    pub(crate) fn point_after(&self, key: Option<&InternalKey>) -> Option<(InternalKey, Bytes)> {
        let lower = match key {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };
        self.points
            .range((lower, Bound::Unbounded))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    /// Last point entry strictly before `key` (or the last entry overall).
    pub(crate) fn point_before(&self, key: Option<&InternalKey>) -> Option<(InternalKey, Bytes)> {
        let upper = match key {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };
        self.points
            .range((Bound::Unbounded, upper))
            .next_back()
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    pub fn range_tombstones(&self) -> Vec<RangeTombstone> {
        self.range_dels
            .iter()
            .map(|e| RangeTombstone {
                start: e.key().user_key().clone(),
                end: e.value().clone(),
                seq_num: e.key().seq_num(),
            })
            .collect()
    }

    pub fn range_key_spans(&self) -> Vec<RangeKeySpan> {
        self.range_keys
            .iter()
            .map(|e| {
                let v = e.value();
                RangeKeySpan {
                    start: e.key().user_key().clone(),
                    end: v.end.clone(),
                    key: RangeKey {
                        seq_num: e.key().seq_num(),
                        kind: e.key().kind(),
                        suffix: v.suffix.clone(),
                        value: v.value.clone(),
                    },
                }
            })
            .collect()
    }

    /// All point entries in internal key order.
    pub fn collect_points(&self) -> Vec<(InternalKey, Bytes)> {
        self.points
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.range_dels.is_empty() && self.range_keys.is_empty()
    }

    /// Marks a delayed flush as scheduled. Returns false if one already was.
    pub(crate) fn try_mark_delayed_flush(&self) -> bool {
        !self.delayed_flush_scheduled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn reset_delayed_flush(&self) {
        self.delayed_flush_scheduled.store(false, Ordering::Release);
    }
}
