use bytes::Bytes;

use crate::{
    db::ReadPin,
    iterator::{InternalIterator, Iterator, MergingIterator},
    key::{InternalKey, RangeTombstone, SeqNum},
    util::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Iterator over user keys as of a sequence number
///
/// Wraps a [`MergingIterator`] over every source of a read view and
/// exposes, for each user key, the newest version with a sequence number
/// at or below the iterator's. Keys whose newest visible version is a
/// deletion, or that a visible range deletion covers, are skipped.
///
/// While forward, the inner iterator sits on the entry being exposed.
/// While reverse, it sits just before every entry of the exposed key.
///
/// The iterator pins the data it reads; the pin is released on drop.
pub struct DbIter {
    iter: MergingIterator,
    seq_num: SeqNum,
    range_dels: Vec<RangeTombstone>,
    lower_bound: Option<Bytes>,
    upper_bound: Option<Bytes>,
    direction: Direction,
    current: Option<(Bytes, Bytes)>,
    _pin: ReadPin,
}

impl DbIter {
    pub(crate) fn new(
        iter: MergingIterator,
        seq_num: SeqNum,
        range_dels: Vec<RangeTombstone>,
        lower_bound: Option<Bytes>,
        upper_bound: Option<Bytes>,
        pin: ReadPin,
    ) -> Self {
        log::trace!(
            "new iterator at seq {} with {} range deletions",
            seq_num,
            range_dels.len()
        );
        DbIter {
            iter,
            seq_num,
            range_dels,
            lower_bound,
            upper_bound,
            direction: Direction::Forward,
            current: None,
            _pin: pin,
        }
    }

    pub fn seq_num(&self) -> SeqNum {
        self.seq_num
    }

    fn is_deleted(&self, key: &InternalKey) -> bool {
        key.is_deletion()
            || self.range_dels.iter().any(|t| {
                t.seq_num <= self.seq_num && t.covers(key.user_key(), key.seq_num())
            })
    }

    fn above_upper(&self, user_key: &[u8]) -> bool {
        self.upper_bound
            .as_ref()
            .is_some_and(|upper| user_key >= upper.as_ref())
    }

    fn below_lower(&self, user_key: &[u8]) -> bool {
        self.lower_bound
            .as_ref()
            .is_some_and(|lower| user_key < lower.as_ref())
    }

    /// Advances the inner iterator to the newest visible live entry of the
    /// next user key, skipping every entry of `skip`.
    fn find_next_user_entry(&mut self, mut skip: Option<Bytes>) -> Result<bool> {
        self.direction = Direction::Forward;
        while self.iter.valid() {
            let key = self.iter.key();
            if self.above_upper(key.user_key()) {
                break;
            }
            let shadowed = skip.as_ref().is_some_and(|s| s == key.user_key());
            if key.visible_at(self.seq_num) && !shadowed {
                if !self.is_deleted(key) {
                    self.current = Some((key.user_key().clone(), self.iter.value().clone()));
                    return Ok(true);
                }
                skip = Some(key.user_key().clone());
            }
            self.iter.next()?;
        }
        self.current = None;
        Ok(false)
    }

    /// Walks backward, remembering the newest visible entry of the user key
    /// being passed over, until a live entry is found and the walk has left
    /// its user key.
    fn find_prev_user_entry(&mut self) -> Result<bool> {
        self.direction = Direction::Reverse;
        let mut saved: Option<(Bytes, Bytes, bool)> = None;
        while self.iter.valid() {
            let key = self.iter.key();
            if key.visible_at(self.seq_num) {
                if let Some((user_key, _, live)) = &saved
                    && *live
                    && user_key != key.user_key()
                {
                    break;
                }
                if self.below_lower(key.user_key()) {
                    break;
                }
                let live = !self.is_deleted(key);
                saved = Some((key.user_key().clone(), self.iter.value().clone(), live));
            }
            self.iter.prev()?;
        }

        match saved {
            Some((user_key, value, true)) => {
                self.current = Some((user_key, value));
                Ok(true)
            }
            _ => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Positions the inner iterator before every entry of keys >= `upper`.
    fn seek_before(&mut self, upper: &[u8]) -> Result<bool> {
        self.iter.seek_for_prev(&InternalKey::seek_key(upper))
    }
}

impl std::fmt::Debug for DbIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIter")
            .field("seq_num", &self.seq_num)
            .field("lower_bound", &self.lower_bound)
            .field("upper_bound", &self.upper_bound)
            .field("direction", &self.direction)
            .field("current", &self.current.as_ref().map(|(k, _)| k))
            .finish_non_exhaustive()
    }
}

impl Iterator for DbIter {
    fn seek_to_first(&mut self) -> Result<bool> {
        match self.lower_bound.clone() {
            Some(lower) => self.iter.seek(&InternalKey::seek_key(&lower))?,
            None => self.iter.seek_to_first()?,
        };
        self.find_next_user_entry(None)
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        match self.upper_bound.clone() {
            Some(upper) => self.seek_before(&upper)?,
            None => self.iter.seek_to_last()?,
        };
        self.find_prev_user_entry()
    }

    fn seek(&mut self, target: &[u8]) -> Result<bool> {
        let target = match &self.lower_bound {
            Some(lower) if target < lower.as_ref() => lower.clone(),
            _ => Bytes::copy_from_slice(target),
        };
        self.iter.seek(&InternalKey::seek_key(&target))?;
        self.find_next_user_entry(None)
    }

    fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool> {
        match self.upper_bound.clone() {
            Some(upper) if target >= upper.as_ref() => self.seek_before(&upper)?,
            _ => self
                .iter
                .seek_for_prev(&InternalKey::seek_for_prev_key(target))?,
        };
        self.find_prev_user_entry()
    }

    fn next(&mut self) -> Result<bool> {
        let Some((user_key, _)) = self.current.clone() else {
            return Ok(false);
        };
        match self.direction {
            Direction::Forward => {
                self.iter.next()?;
            }
            Direction::Reverse => {
                // The inner iterator sits before the current key.
                self.iter.seek(&InternalKey::seek_key(&user_key))?;
            }
        }
        self.find_next_user_entry(Some(user_key))
    }

    fn prev(&mut self) -> Result<bool> {
        let Some((user_key, _)) = self.current.clone() else {
            return Ok(false);
        };
        if self.direction == Direction::Forward {
            self.seek_before(&user_key)?;
        }
        self.find_prev_user_entry()
    }

    fn key(&self) -> Bytes {
        self.current
            .as_ref()
            .map(|(k, _)| k.clone())
            .unwrap_or_default()
    }

    fn value(&self) -> Bytes {
        self.current
            .as_ref()
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }
}
