use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    key::InternalKey,
    util::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merging iterator for combining multiple sorted internal iterators
///
/// Internal keys are unique across sources (every write has its own
/// sequence number), so the merge needs no shadowing rules: it always
/// exposes the smallest (forward) or largest (reverse) key among its
/// children. Collapsing versions of a user key is left to the caller.
///
/// # Implementation Notes
///
/// - The current child is found by a linear scan over children, which is
///   cheap for the handful of sources a read spans
/// - Switching direction re-seeks every non-current child around the
///   current key
pub struct MergingIterator {
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(children: Vec<Box<dyn InternalIterator>>) -> Self {
        MergingIterator {
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    /// Index of the child the current entry comes from.
    pub fn current_child(&self) -> Option<usize> {
        self.current
    }

    fn find_smallest(&mut self) -> bool {
        self.direction = Direction::Forward;
        self.current = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match self.current {
                Some(cur) if self.children[cur].key() <= child.key() => {},
                _ => self.current = Some(idx),
            }
        }
        self.current.is_some()
    }

    fn find_largest(&mut self) -> bool {
        self.direction = Direction::Reverse;
        self.current = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match self.current {
                Some(cur) if self.children[cur].key() >= child.key() => {},
                _ => self.current = Some(idx),
            }
        }
        self.current.is_some()
    }
}

impl InternalIterator for MergingIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        Ok(self.find_smallest())
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        Ok(self.find_largest())
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        Ok(self.find_smallest())
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        for child in &mut self.children {
            child.seek_for_prev(target)?;
        }
        Ok(self.find_largest())
    }

    fn next(&mut self) -> Result<bool> {
        let Some(cur) = self.current else {
            return Ok(false);
        };

        if self.direction == Direction::Reverse {
            // Every other child sits before the current key; move each to
            // the first entry after it.
            let key = self.children[cur].key().clone();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx != cur {
                    child.seek(&key)?;
                }
            }
        }

        self.children[cur].next()?;
        Ok(self.find_smallest())
    }

    fn prev(&mut self) -> Result<bool> {
        let Some(cur) = self.current else {
            return Ok(false);
        };

        if self.direction == Direction::Forward {
            let key = self.children[cur].key().clone();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx != cur {
                    child.seek_for_prev(&key)?;
                }
            }
        }

        self.children[cur].prev()?;
        Ok(self.find_largest())
    }

    fn key(&self) -> &InternalKey {
        match self.current {
            Some(cur) => self.children[cur].key(),
            None => panic!("key() called on invalid merging iterator"),
        }
    }

    fn value(&self) -> &Bytes {
        match self.current {
            Some(cur) => self.children[cur].value(),
            None => panic!("value() called on invalid merging iterator"),
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }
}
