use std::sync::Arc;

use crate::key::{KeyRange, SeqNum};
use crate::memtable::MemTable;

/// The memtables that have not been flushed yet.
///
/// Ordered oldest first; the last entry is the mutable memtable receiving
/// writes, all others are immutable and waiting to be flushed.
pub struct MemTableQueue {
    queue: Vec<Arc<MemTable>>,
    next_id: u64,
}

impl MemTableQueue {
    pub fn new(log_seq_num: SeqNum) -> Self {
        MemTableQueue {
            queue: vec![Arc::new(MemTable::new(1, log_seq_num))],
            next_id: 2,
        }
    }

    pub fn mutable(&self) -> &Arc<MemTable> {
        // The queue always holds the mutable memtable.
        &self.queue[self.queue.len() - 1]
    }

    pub fn queue(&self) -> &[Arc<MemTable>] {
        &self.queue
    }

    /// Immutable memtables, oldest first.
    pub fn immutables(&self) -> &[Arc<MemTable>] {
        &self.queue[..self.queue.len() - 1]
    }

    /// Seals the mutable memtable and installs a fresh one whose first
    /// sequence number is `log_seq_num`.
    pub fn rotate(&mut self, log_seq_num: SeqNum) -> Arc<MemTable> {
        let mem = Arc::new(MemTable::new(self.next_id, log_seq_num));
        self.next_id += 1;
        self.queue.push(Arc::clone(&mem));
        log::trace!("rotated memtable, new mutable memtable #{}", mem.id());
        mem
    }

    /// Drops the `n` oldest memtables after they were flushed.
    pub fn remove_flushed(&mut self, n: usize) {
        assert!(n < self.queue.len(), "cannot remove the mutable memtable");
        self.queue.drain(..n);
    }

    /// Minimum first sequence number over memtables that hold data, or
    /// `next_seq_num` if none does.
    pub fn earliest_unflushed_seq_num(&self, next_seq_num: SeqNum) -> SeqNum {
        self.queue
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| m.log_seq_num())
            .min()
            .unwrap_or(next_seq_num)
    }

    pub fn overlaps(&self, ranges: &[KeyRange]) -> bool {
        self.queue.iter().any(|m| m.overlaps(ranges))
    }

    pub fn contains(&self, mem: &Arc<MemTable>) -> bool {
        self.queue.iter().any(|m| Arc::ptr_eq(m, mem))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_queue_starts_with_one_mutable_memtable() {
        let queue = MemTableQueue::new(1);
        assert_eq!(queue.queue().len(), 1);
        assert!(queue.immutables().is_empty());
        assert_eq!(queue.mutable().log_seq_num(), 1);
    }

    #[test]
    fn test_rotate_and_remove() {
        let mut queue = MemTableQueue::new(1);
        let first = Arc::clone(queue.mutable());
        first.set(1, Bytes::from("a"), Bytes::from("1"));

        queue.rotate(2);
        assert_eq!(queue.immutables().len(), 1);
        assert!(Arc::ptr_eq(&queue.immutables()[0], &first));
        assert_eq!(queue.mutable().log_seq_num(), 2);

        queue.remove_flushed(1);
        assert!(!queue.contains(&first));
        assert_eq!(queue.queue().len(), 1);
    }

    #[test]
    fn test_earliest_unflushed_skips_empty_memtables() {
        let mut queue = MemTableQueue::new(1);
        assert_eq!(queue.earliest_unflushed_seq_num(5), 5);

        queue.mutable().set(3, Bytes::from("a"), Bytes::from("1"));
        queue.rotate(4);
        assert_eq!(queue.earliest_unflushed_seq_num(5), 1);

        queue.remove_flushed(1);
        assert_eq!(queue.earliest_unflushed_seq_num(5), 5);
    }

    #[test]
    #[should_panic(expected = "cannot remove the mutable memtable")]
    fn test_remove_mutable_panics() {
        let mut queue = MemTableQueue::new(1);
        queue.remove_flushed(1);
    }
}
