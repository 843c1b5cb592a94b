use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    key::InternalKey,
    memtable::MemTable,
    util::Result,
};

/// Iterator for MemTable point entries
///
/// # Implementation Notes
///
/// The crossbeam_skiplist iterator borrows the map, so we keep the current
/// entry and use range() to find the next/previous element.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(InternalKey, Bytes)>,
}

impl MemTableIterator {
    pub fn new(mem: Arc<MemTable>) -> Self {
        MemTableIterator { mem, current: None }
    }

    fn set_current(&mut self, entry: Option<(InternalKey, Bytes)>) -> Result<bool> {
        self.current = entry;
        Ok(self.current.is_some())
    }
}

impl InternalIterator for MemTableIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        let entry = self.mem.point_after(None);
        self.set_current(entry)
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        let entry = self.mem.point_before(None);
        self.set_current(entry)
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        let entry = self
            .mem
            .points()
            .range((Bound::Included(target.clone()), Bound::Unbounded))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()));
        self.set_current(entry)
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        let entry = self
            .mem
            .points()
            .range((Bound::Unbounded, Bound::Included(target.clone())))
            .next_back()
            .map(|e| (e.key().clone(), e.value().clone()));
        self.set_current(entry)
    }

    fn next(&mut self) -> Result<bool> {
        let Some((key, _)) = &self.current else {
            return Ok(false);
        };
        let entry = self.mem.point_after(Some(key));
        self.set_current(entry)
    }

    fn prev(&mut self) -> Result<bool> {
        let Some((key, _)) = &self.current else {
            return Ok(false);
        };
        let entry = self.mem.point_before(Some(key));
        self.set_current(entry)
    }

    fn key(&self) -> &InternalKey {
        match &self.current {
            Some((key, _)) => key,
            None => panic!("key() called on invalid memtable iterator"),
        }
    }

    fn value(&self) -> &Bytes {
        match &self.current {
            Some((_, value)) => value,
            None => panic!("value() called on invalid memtable iterator"),
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }
}
