use std::sync::Arc;

use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    key::InternalKey,
    util::Result,
    version::Table,
};

/// Iterator over the point entries of one file
///
/// Positions are indexes into the table's sorted entries; seeks are binary
/// searches.
pub struct TableIterator {
    table: Arc<Table>,
    /// `None` when unpositioned or exhausted
    index: Option<usize>,
}

impl TableIterator {
    pub fn new(table: Arc<Table>) -> Self {
        TableIterator { table, index: None }
    }

    fn position(&mut self, index: Option<usize>) -> Result<bool> {
        self.index = index.filter(|&i| i < self.table.points().len());
        Ok(self.index.is_some())
    }
}

impl InternalIterator for TableIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        self.position(Some(0))
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        let last = self.table.points().len().checked_sub(1);
        self.position(last)
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        let index = self.table.points().partition_point(|(k, _)| k < target);
        self.position(Some(index))
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        let index = self.table.points().partition_point(|(k, _)| k <= target);
        self.position(index.checked_sub(1))
    }

    fn next(&mut self) -> Result<bool> {
        let next = self.index.map(|i| i + 1);
        self.position(next)
    }

    fn prev(&mut self) -> Result<bool> {
        let prev = self.index.and_then(|i| i.checked_sub(1));
        self.position(prev)
    }

    fn key(&self) -> &InternalKey {
        match self.index {
            Some(i) => &self.table.points()[i].0,
            None => panic!("key() called on invalid table iterator"),
        }
    }

    fn value(&self) -> &Bytes {
        match self.index {
            Some(i) => &self.table.points()[i].1,
            None => panic!("value() called on invalid table iterator"),
        }
    }

    fn valid(&self) -> bool {
        self.index.is_some()
    }
}
