use bytes::Bytes;

use crate::key::{InternalKey, InternalKeyKind, RangeKeySpan, RangeTombstone, SeqNum};

/// Immutable sorted run produced by a flush or compaction.
///
/// Stands in for an sstable: point entries are kept in internal key order,
/// spans in start key order.
#[derive(Debug, Default)]
pub struct Table {
    points: Vec<(InternalKey, Bytes)>,
    range_dels: Vec<RangeTombstone>,
    range_keys: Vec<RangeKeySpan>,
}

impl Table {
    /// Builds a table. `points` must already be sorted in internal key
    /// order.
    pub fn new(
        points: Vec<(InternalKey, Bytes)>,
        mut range_dels: Vec<RangeTombstone>,
        mut range_keys: Vec<RangeKeySpan>,
    ) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
        range_dels.sort_by(|a, b| a.start.cmp(&b.start).then(b.seq_num.cmp(&a.seq_num)));
        range_keys.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.key.seq_num.cmp(&a.key.seq_num))
        });
        Table {
            points,
            range_dels,
            range_keys,
        }
    }

    pub fn points(&self) -> &[(InternalKey, Bytes)] {
        &self.points
    }

    pub fn range_dels(&self) -> &[RangeTombstone] {
        &self.range_dels
    }

    pub fn range_keys(&self) -> &[RangeKeySpan] {
        &self.range_keys
    }

    /// Newest point entry for `key` visible at `seq_num`, tombstones
    /// included.
    pub fn get(&self, key: &[u8], seq_num: SeqNum) -> Option<(InternalKey, Bytes)> {
        let target = InternalKey::new(Bytes::copy_from_slice(key), seq_num, InternalKeyKind::Set);
        let index = self.points.partition_point(|(k, _)| k < &target);
        self.points
            .get(index)
            .filter(|(k, _)| k.user_key().as_ref() == key)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.range_dels.is_empty() && self.range_keys.is_empty()
    }

    /// Inclusive user key bounds. Span end keys are exclusive but are folded
    /// into `largest` so that overlap checks stay conservative.
    pub fn bounds(&self) -> Option<(Bytes, Bytes)> {
        let starts = self
            .points
            .iter()
            .map(|(k, _)| k.user_key())
            .chain(self.range_dels.iter().map(|t| &t.start))
            .chain(self.range_keys.iter().map(|s| &s.start));
        let ends = self
            .points
            .iter()
            .map(|(k, _)| k.user_key())
            .chain(self.range_dels.iter().map(|t| &t.end))
            .chain(self.range_keys.iter().map(|s| &s.end));
        let smallest = starts.min()?.clone();
        let largest = ends.max()?.clone();
        Some((smallest, largest))
    }

    pub fn seq_num_bounds(&self) -> Option<(SeqNum, SeqNum)> {
        let seqs = self
            .points
            .iter()
            .map(|(k, _)| k.seq_num())
            .chain(self.range_dels.iter().map(|t| t.seq_num))
            .chain(self.range_keys.iter().map(|s| s.key.seq_num));
        seqs.fold(None, |acc, s| match acc {
            None => Some((s, s)),
            Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
        })
    }

    /// Point tombstones plus range deletions.
    pub fn num_deletions(&self) -> usize {
        self.points.iter().filter(|(k, _)| k.is_deletion()).count() + self.range_dels.len()
    }

    /// Point entries shadowed by a newer entry of the same user key.
    pub fn num_superseded(&self) -> usize {
        self.points
            .windows(2)
            .filter(|w| w[0].0.user_key() == w[1].0.user_key())
            .count()
    }

    pub fn approximate_size(&self) -> u64 {
        let points: usize = self
            .points
            .iter()
            .map(|(k, v)| k.user_key().len() + v.len() + 9)
            .sum();
        let dels: usize = self
            .range_dels
            .iter()
            .map(|t| t.start.len() + t.end.len() + 8)
            .sum();
        let keys: usize = self
            .range_keys
            .iter()
            .map(|s| s.start.len() + s.end.len() + s.key.suffix.len() + s.key.value.len() + 9)
            .sum();
        (points + dels + keys) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(key: &'static str, seq: SeqNum, kind: InternalKeyKind) -> (InternalKey, Bytes) {
        (InternalKey::new(key, seq, kind), Bytes::from("v"))
    }

    #[test]
    fn test_bounds_include_span_ends() {
        let table = Table::new(
            vec![point("c", 3, InternalKeyKind::Set)],
            vec![RangeTombstone::new("a", "b", 1)],
            vec![],
        );
        let (smallest, largest) = table.bounds().unwrap();
        assert_eq!(smallest, Bytes::from("a"));
        assert_eq!(largest, Bytes::from("c"));
        assert_eq!(table.seq_num_bounds(), Some((1, 3)));
    }

    #[test]
    fn test_empty_table_has_no_bounds() {
        let table = Table::default();
        assert!(table.is_empty());
        assert!(table.bounds().is_none());
        assert!(table.seq_num_bounds().is_none());
    }

    #[test]
    fn test_get_respects_sequence() {
        let table = Table::new(
            vec![
                point("a", 5, InternalKeyKind::Set),
                point("a", 2, InternalKeyKind::Set),
                point("b", 4, InternalKeyKind::Delete),
            ],
            vec![],
            vec![],
        );
        assert_eq!(table.get(b"a", 9).unwrap().0.seq_num(), 5);
        assert_eq!(table.get(b"a", 4).unwrap().0.seq_num(), 2);
        assert!(table.get(b"a", 1).is_none());
        assert!(table.get(b"b", 4).unwrap().0.is_deletion());
        assert!(table.get(b"c", 9).is_none());
    }

    #[test]
    fn test_elision_counters() {
        let table = Table::new(
            vec![
                point("a", 5, InternalKeyKind::Set),
                point("a", 2, InternalKeyKind::Set),
                point("b", 4, InternalKeyKind::Delete),
            ],
            vec![RangeTombstone::new("x", "y", 1)],
            vec![],
        );
        assert_eq!(table.num_superseded(), 1);
        assert_eq!(table.num_deletions(), 2);
    }
}
