use bytes::Bytes;

use crate::key::{InternalKeyKind, SeqNum};
use crate::memtable::MemTable;

/// Write operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set {
        key: Bytes,
        value: Bytes,
    },
    Delete {
        key: Bytes,
    },
    DeleteRange {
        start: Bytes,
        end: Bytes,
    },
    RangeKey {
        kind: InternalKeyKind,
        start: Bytes,
        end: Bytes,
        suffix: Bytes,
        value: Bytes,
    },
}

/// WriteBatch accumulates multiple write operations for atomic execution
///
/// Each operation is assigned its own sequence number, consecutive within
/// the batch; the batch becomes visible all at once.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    /// Approximate memory usage in bytes
    data_size: usize,
}

impl WriteBatch {
    #[inline]
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        let (key, value) = (key.into(), value.into());
        self.data_size += key.len() + value.len();
        self.ops.push(WriteOp::Set { key, value });
        self
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) -> &mut Self {
        let key = key.into();
        self.data_size += key.len();
        self.ops.push(WriteOp::Delete { key });
        self
    }

    /// Deletes every key in `[start, end)`.
    pub fn delete_range(&mut self, start: impl Into<Bytes>, end: impl Into<Bytes>) -> &mut Self {
        let (start, end) = (start.into(), end.into());
        self.data_size += start.len() + end.len();
        self.ops.push(WriteOp::DeleteRange { start, end });
        self
    }

    pub fn range_key_set(
        &mut self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        suffix: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.push_range_key(InternalKeyKind::RangeKeySet, start, end, suffix, value)
    }

    pub fn range_key_unset(
        &mut self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        suffix: impl Into<Bytes>,
    ) -> &mut Self {
        self.push_range_key(InternalKeyKind::RangeKeyUnset, start, end, suffix, Bytes::new())
    }

    pub fn range_key_delete(
        &mut self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) -> &mut Self {
        self.push_range_key(
            InternalKeyKind::RangeKeyDelete,
            start,
            end,
            Bytes::new(),
            Bytes::new(),
        )
    }

    fn push_range_key(
        &mut self,
        kind: InternalKeyKind,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        suffix: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        let (start, end, suffix, value) = (start.into(), end.into(), suffix.into(), value.into());
        self.data_size += start.len() + end.len() + suffix.len() + value.len();
        self.ops.push(WriteOp::RangeKey {
            kind,
            start,
            end,
            suffix,
            value,
        });
        self
    }

    /// Applies every operation to `mem`, starting at `first_seq`. Returns
    /// the sequence number of the last operation.
    pub(crate) fn apply_to(&self, mem: &MemTable, first_seq: SeqNum) -> SeqNum {
        let mut seq = first_seq;
        for op in &self.ops {
            match op {
                WriteOp::Set { key, value } => mem.set(seq, key.clone(), value.clone()),
                WriteOp::Delete { key } => mem.delete(seq, key.clone()),
                WriteOp::DeleteRange { start, end } => {
                    mem.delete_range(seq, start.clone(), end.clone())
                }
                WriteOp::RangeKey {
                    kind,
                    start,
                    end,
                    suffix,
                    value,
                } => mem.add_range_key(
                    seq,
                    *kind,
                    start.clone(),
                    end.clone(),
                    suffix.clone(),
                    value.clone(),
                ),
            }
            seq += 1;
        }
        seq - 1
    }

    #[inline]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.data_size = 0;
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_basic() {
        let mut batch = WriteBatch::new();
        batch.set("key1", "value1").set("key2", "value2").delete("key3");

        assert_eq!(batch.count(), 3);
        assert_eq!(batch.data_size(), 4 + 6 + 4 + 6 + 4);
    }

    #[test]
    fn test_apply_assigns_consecutive_sequence_numbers() {
        let mut batch = WriteBatch::new();
        batch
            .set("a", "1")
            .delete("b")
            .delete_range("c", "d")
            .range_key_set("e", "f", "@1", "x");

        let mem = MemTable::new(1, 10);
        let last = batch.apply_to(&mem, 10);
        assert_eq!(last, 13);

        assert_eq!(mem.get(b"a", 13).unwrap().0.seq_num(), 10);
        assert_eq!(mem.get(b"b", 13).unwrap().0.seq_num(), 11);
        assert_eq!(mem.range_tombstones()[0].seq_num, 12);
        assert_eq!(mem.range_key_spans()[0].key.seq_num, 13);
    }

    #[test]
    fn test_clear() {
        let mut batch = WriteBatch::new();
        batch.set("k", "v");
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.data_size(), 0);
    }
}
