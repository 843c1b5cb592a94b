use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::key::{SEQ_NUM_MAX, SeqNum};
use crate::snapshot::efos::EfosInner;

/// Index of the sentinel node. It is never handed out as a link.
const ROOT: usize = 0;

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Position of a snapshot inside a [`SnapshotList`].
///
/// Stale links (to a slot that has since been freed and reused) are
/// detected through the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SnapshotLink {
    list_id: u64,
    index: usize,
    generation: u64,
}

struct Node {
    seq_num: SeqNum,
    efos: Option<Weak<EfosInner>>,
    prev: usize,
    next: usize,
    generation: u64,
}

/// Registry of open snapshots in creation order.
///
/// Snapshots are created with the current visible sequence number under the
/// engine lock, so creation order is also sequence order and the head is
/// always the earliest snapshot. A doubly-linked list over an arena of
/// nodes gives O(1) push, remove and head access. The list has no locking
/// of its own; it lives inside the engine state.
pub(crate) struct SnapshotList {
    id: u64,
    nodes: Vec<Node>,
    free: Vec<usize>,
    len: usize,
}

impl SnapshotList {
    pub(crate) fn new() -> Self {
        let root = Node {
            seq_num: SEQ_NUM_MAX,
            efos: None,
            prev: ROOT,
            next: ROOT,
            generation: 0,
        };
        SnapshotList {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            nodes: vec![root],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Appends a snapshot at the tail and stores its link in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` already holds a link.
    pub(crate) fn push_back(
        &mut self,
        slot: &mut Option<SnapshotLink>,
        seq_num: SeqNum,
        efos: Option<Weak<EfosInner>>,
    ) {
        if slot.is_some() {
            panic!("snapshot list is inconsistent: snapshot is already linked");
        }

        let tail = self.nodes[ROOT].prev;
        let index = match self.free.pop() {
            Some(index) => {
                let node = &mut self.nodes[index];
                node.seq_num = seq_num;
                node.efos = efos;
                node.prev = tail;
                node.next = ROOT;
                index
            }
            None => {
                self.nodes.push(Node {
                    seq_num,
                    efos,
                    prev: tail,
                    next: ROOT,
                    generation: 0,
                });
                self.nodes.len() - 1
            }
        };
        self.nodes[tail].next = index;
        self.nodes[ROOT].prev = index;
        self.len += 1;

        *slot = Some(SnapshotLink {
            list_id: self.id,
            index,
            generation: self.nodes[index].generation,
        });
        log::trace!("registered snapshot at seq {seq_num}, {} open", self.len);
    }

    /// Unlinks the snapshot `slot` points at and clears `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is empty, points at the root, belongs to another
    /// list or is stale.
    pub(crate) fn remove(&mut self, slot: &mut Option<SnapshotLink>) {
        let Some(link) = slot.take() else {
            panic!("snapshot list is inconsistent: snapshot is not linked");
        };
        if link.index == ROOT {
            panic!("cannot remove snapshot list root node");
        }
        if link.list_id != self.id {
            panic!("snapshot list is inconsistent: snapshot belongs to another list");
        }
        let live = self
            .nodes
            .get(link.index)
            .is_some_and(|n| n.generation == link.generation);
        if !live {
            panic!("snapshot list is inconsistent: snapshot link is stale");
        }

        let (prev, next) = (self.nodes[link.index].prev, self.nodes[link.index].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;

        let node = &mut self.nodes[link.index];
        let seq_num = node.seq_num;
        node.generation += 1;
        node.efos = None;
        node.prev = link.index;
        node.next = link.index;
        self.free.push(link.index);
        self.len -= 1;
        log::trace!("unregistered snapshot at seq {seq_num}, {} open", self.len);
    }

    pub(crate) fn count(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes[ROOT].next == ROOT
    }

    /// Sequence number of the oldest open snapshot, or [`SEQ_NUM_MAX`] if
    /// none is open.
    pub(crate) fn earliest(&self) -> SeqNum {
        if self.is_empty() {
            return SEQ_NUM_MAX;
        }
        self.nodes[self.nodes[ROOT].next].seq_num
    }

    fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        let mut index = self.nodes[ROOT].next;
        std::iter::from_fn(move || {
            if index == ROOT {
                return None;
            }
            let node = &self.nodes[index];
            index = node.next;
            Some(node)
        })
    }

    /// Sequence numbers of every open snapshot, oldest first.
    pub(crate) fn to_sequence_slice(&self) -> Vec<SeqNum> {
        self.iter().map(|n| n.seq_num).collect()
    }

    /// Eventually file-only snapshots still pinning memtables, oldest
    /// first.
    pub(crate) fn efos_handles(&self) -> Vec<Arc<EfosInner>> {
        self.iter()
            .filter_map(|n| n.efos.as_ref().and_then(Weak::upgrade))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn root_link(&self) -> SnapshotLink {
        SnapshotLink {
            list_id: self.id,
            index: ROOT,
            generation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_empty_list() {
        let list = SnapshotList::new();
        assert_eq!(list.count(), 0);
        assert_eq!(list.earliest(), SEQ_NUM_MAX);
        assert!(list.to_sequence_slice().is_empty());
    }

    #[test]
    fn test_push_and_remove() {
        let mut list = SnapshotList::new();
        let mut a = None;
        let mut b = None;
        let mut c = None;
        list.push_back(&mut a, 10, None);
        list.push_back(&mut b, 20, None);
        list.push_back(&mut c, 30, None);
        assert_eq!(list.count(), 3);
        assert_eq!(list.earliest(), 10);

        list.remove(&mut b);
        assert!(b.is_none());
        assert_eq!(list.to_sequence_slice(), vec![10, 30]);

        list.remove(&mut a);
        assert_eq!(list.earliest(), 30);

        list.remove(&mut c);
        assert_eq!(list.earliest(), SEQ_NUM_MAX);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = SnapshotList::new();
        let mut a = None;
        list.push_back(&mut a, 1, None);
        let old = a.unwrap();
        list.remove(&mut a);

        let mut b = None;
        list.push_back(&mut b, 2, None);
        let new = b.unwrap();
        assert_eq!(old.index, new.index);
        assert_ne!(old.generation, new.generation);
    }

    #[test]
    #[should_panic(expected = "snapshot is already linked")]
    fn test_double_push_panics() {
        let mut list = SnapshotList::new();
        let mut a = None;
        list.push_back(&mut a, 1, None);
        list.push_back(&mut a, 2, None);
    }

    #[test]
    #[should_panic(expected = "snapshot is not linked")]
    fn test_remove_unlinked_panics() {
        let mut list = SnapshotList::new();
        list.remove(&mut None);
    }

    #[test]
    #[should_panic(expected = "cannot remove snapshot list root node")]
    fn test_remove_root_panics() {
        let mut list = SnapshotList::new();
        let mut root = Some(list.root_link());
        list.remove(&mut root);
    }

    #[test]
    #[should_panic(expected = "belongs to another list")]
    fn test_remove_foreign_panics() {
        let mut first = SnapshotList::new();
        let mut second = SnapshotList::new();
        let mut a = None;
        first.push_back(&mut a, 1, None);
        second.remove(&mut a);
    }

    #[test]
    #[should_panic(expected = "snapshot link is stale")]
    fn test_remove_stale_panics() {
        let mut list = SnapshotList::new();
        let mut a = None;
        list.push_back(&mut a, 1, None);
        let mut stale = a;
        list.remove(&mut a);
        list.remove(&mut stale);
    }

    proptest! {
        /// `earliest` always equals the minimum open sequence number.
        #[test]
        fn prop_earliest_is_minimum(
            ops in prop::collection::vec((any::<bool>(), 0usize..16), 1..64)
        ) {
            let mut list = SnapshotList::new();
            let mut open: Vec<(SeqNum, Option<SnapshotLink>)> = Vec::new();
            let mut seq = 0;

            for (push, pick) in ops {
                if push || open.is_empty() {
                    seq += 1;
                    let mut slot = None;
                    list.push_back(&mut slot, seq, None);
                    open.push((seq, slot));
                } else {
                    let (_, mut slot) = open.remove(pick % open.len());
                    list.remove(&mut slot);
                }

                let expected = open.iter().map(|(s, _)| *s).min().unwrap_or(SEQ_NUM_MAX);
                prop_assert_eq!(list.earliest(), expected);
                prop_assert_eq!(list.count(), open.len());
                let seqs: Vec<SeqNum> = open.iter().map(|(s, _)| *s).collect();
                prop_assert_eq!(list.to_sequence_slice(), seqs);
            }
        }
    }
}
