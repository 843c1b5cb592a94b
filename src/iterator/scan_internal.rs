//! Raw scans over a read view.
//!
//! A scan visits, in key order, the newest visible internal point key of
//! every user key (tombstones included), every range deletion fragment and
//! every range key fragment within the bounds. Where a point key and span
//! fragments share a start key, range deletions come first, then range
//! keys, then the point key.

use bytes::Bytes;

use crate::{
    db::ReadView,
    iterator::{InternalIterator, MergingIterator, keyspan},
    key::{InternalKey, RangeKey, SeqNum},
    util::{Result, Status},
    version::{FileMetaData, NUM_LEVELS, SHARED_LEVELS_START},
};

/// Where a point key surfaced by a scan lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorLevel {
    /// A memtable; index 0 is the newest.
    Memtable { index: usize },
    /// A file in the version.
    Level { level: usize, file_number: u64 },
}

/// A file on shared storage handed to a scan visitor instead of its
/// contents, with bounds clipped to the scan's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFileMeta {
    pub file_number: u64,
    pub level: usize,
    pub smallest: Bytes,
    pub largest: Bytes,
    pub smallest_seq_num: SeqNum,
    pub largest_seq_num: SeqNum,
    pub size: u64,
}

impl SharedFileMeta {
    fn clipped(
        file: &FileMetaData,
        level: usize,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Self {
        let smallest = match lower {
            Some(lower) if file.smallest.as_ref() < lower => Bytes::copy_from_slice(lower),
            _ => file.smallest.clone(),
        };
        let largest = match upper {
            Some(upper) if file.largest.as_ref() >= upper => Bytes::copy_from_slice(upper),
            _ => file.largest.clone(),
        };
        SharedFileMeta {
            file_number: file.number,
            level,
            smallest,
            largest,
            smallest_seq_num: file.smallest_seq_num,
            largest_seq_num: file.largest_seq_num,
            size: file.file_size,
        }
    }
}

/// Callbacks invoked by a scan. Every method defaults to a no-op; the first
/// error returned stops the scan and is propagated to the caller.
pub trait ScanInternalVisitor {
    fn visit_point_key(
        &mut self,
        _key: &InternalKey,
        _value: &Bytes,
        _level: IteratorLevel,
    ) -> Result<()> {
        Ok(())
    }

    /// A range deletion fragment, with the largest sequence number among
    /// the deletions covering it.
    fn visit_range_del(&mut self, _start: &[u8], _end: &[u8], _seq_num: SeqNum) -> Result<()> {
        Ok(())
    }

    /// A range key fragment, with every covering range key newest first.
    fn visit_range_key(&mut self, _start: &[u8], _end: &[u8], _keys: &[RangeKey]) -> Result<()> {
        Ok(())
    }

    fn visit_shared_file(&mut self, _file: &SharedFileMeta) -> Result<()> {
        Ok(())
    }

    /// Whether files on shared storage should be handed to
    /// [`visit_shared_file`](Self::visit_shared_file) instead of being
    /// read.
    fn visits_shared_files(&self) -> bool {
        false
    }
}

fn overlaps_bounds(file: &FileMetaData, lower: Option<&[u8]>, upper: Option<&[u8]>) -> bool {
    lower.is_none_or(|lower| file.largest.as_ref() >= lower)
        && upper.is_none_or(|upper| file.smallest.as_ref() < upper)
}

/// Runs a scan over `view` as of `seq_num`.
pub(crate) fn scan_internal(
    view: &ReadView,
    seq_num: SeqNum,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    shared_storage: bool,
    visitor: &mut dyn ScanInternalVisitor,
) -> Result<()> {
    let skip_shared = shared_storage && visitor.visits_shared_files();
    let max_level = if skip_shared {
        SHARED_LEVELS_START
    } else {
        NUM_LEVELS
    };

    if skip_shared {
        for level in SHARED_LEVELS_START..NUM_LEVELS {
            for file in view.version.get_level_files(level) {
                if !overlaps_bounds(file, lower, upper) {
                    continue;
                }
                if file.largest_seq_num > seq_num {
                    return Err(Status::not_supported(format!(
                        "shared file {} contains keys newer than sequence number {}",
                        file.number, seq_num
                    )));
                }
                visitor.visit_shared_file(&SharedFileMeta::clipped(file, level, lower, upper))?;
            }
        }
    }

    let range_dels = view.range_tombstones(seq_num, max_level);
    let del_spans: Vec<(Bytes, Bytes, SeqNum)> = range_dels
        .into_iter()
        .map(|t| (t.start, t.end, t.seq_num))
        .collect();
    let del_fragments = keyspan::truncate(keyspan::fragment(&del_spans), lower, upper);

    let mut key_spans: Vec<(Bytes, Bytes, RangeKey)> = view
        .range_key_spans(seq_num, max_level)
        .into_iter()
        .map(|s| (s.start, s.end, s.key))
        .collect();
    key_spans.sort_by(|a, b| b.2.seq_num.cmp(&a.2.seq_num));
    let key_fragments = keyspan::truncate(keyspan::fragment(&key_spans), lower, upper);

    let mut spans = SpanCursor {
        dels: del_fragments,
        keys: key_fragments,
        del_idx: 0,
        key_idx: 0,
    };

    let (children, levels) = view.point_iterators(max_level);
    let mut iter = MergingIterator::new(children);
    match lower {
        Some(lower) => iter.seek(&InternalKey::seek_key(lower))?,
        None => iter.seek_to_first()?,
    };

    let mut last_user_key: Option<Bytes> = None;
    while iter.valid() {
        let key = iter.key();
        if upper.is_some_and(|upper| key.user_key().as_ref() >= upper) {
            break;
        }
        let seen = last_user_key.as_ref() == Some(key.user_key());
        if key.visible_at(seq_num) && !seen {
            spans.emit_through(Some(key.user_key()), visitor)?;
            let level = match iter.current_child() {
                Some(child) => levels[child],
                None => unreachable!("valid merging iterator has a current child"),
            };
            visitor.visit_point_key(key, iter.value(), level)?;
            last_user_key = Some(key.user_key().clone());
        }
        iter.next()?;
    }
    spans.emit_through(None, visitor)
}

/// Interleaves range deletion and range key fragments by start key.
struct SpanCursor {
    dels: Vec<keyspan::Fragment<SeqNum>>,
    keys: Vec<keyspan::Fragment<RangeKey>>,
    del_idx: usize,
    key_idx: usize,
}

impl SpanCursor {
    /// Emits every fragment starting at or before `limit` (all remaining
    /// fragments if `None`).
    fn emit_through(
        &mut self,
        limit: Option<&Bytes>,
        visitor: &mut dyn ScanInternalVisitor,
    ) -> Result<()> {
        let within = |start: &Bytes| limit.is_none_or(|limit| start <= limit);
        loop {
            let del = self.dels.get(self.del_idx).filter(|f| within(&f.start));
            let key = self.keys.get(self.key_idx).filter(|f| within(&f.start));
            match (del, key) {
                (Some(d), Some(k)) if d.start <= k.start => {
                    Self::emit_del(d, visitor)?;
                    self.del_idx += 1;
                }
                (Some(d), None) => {
                    Self::emit_del(d, visitor)?;
                    self.del_idx += 1;
                }
                (_, Some(k)) => {
                    visitor.visit_range_key(&k.start, &k.end, &k.items)?;
                    self.key_idx += 1;
                }
                (None, None) => return Ok(()),
            }
        }
    }

    fn emit_del(
        fragment: &keyspan::Fragment<SeqNum>,
        visitor: &mut dyn ScanInternalVisitor,
    ) -> Result<()> {
        let seq_num = fragment.items.iter().copied().max().unwrap_or_default();
        visitor.visit_range_del(&fragment.start, &fragment.end, seq_num)
    }
}
