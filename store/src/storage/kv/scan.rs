//! Ordered scans over a list of key ranges
//!
//! A [`Cursor`] walks its ranges in order and yields each record inside
//! them. It keeps no transaction open between steps: every step opens a
//! short read transaction and seeks to the first key after the last one it
//! returned. This keeps cursors `Send`, lets them live across await points,
//! and guarantees nothing is left open when a cursor is dropped.

use heed::types::Bytes;
use heed::{Database, Env};
use std::ops::Bound;

/// Keys sharing `prefix`, from `start` up to and including `end`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    prefix: Vec<u8>,
    start: Vec<u8>,
    end: Option<Vec<u8>>,
}

impl ScanRange {
    /// Every key starting with `prefix`.
    pub fn prefix(prefix: Vec<u8>) -> Self {
        Self {
            start: prefix.clone(),
            prefix,
            end: None,
        }
    }

    /// Keys starting with `prefix` within `[start, end]`.
    pub fn between(prefix: Vec<u8>, start: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            prefix,
            start,
            end: Some(end),
        }
    }

    /// Exactly one key.
    pub fn exact(key: Vec<u8>) -> Self {
        Self {
            prefix: key.clone(),
            start: key.clone(),
            end: Some(key),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
            && key >= self.start.as_slice()
            && self.end.as_deref().map_or(true, |end| key <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    Unstarted,
    /// About to seek to the start of range `i`
    Seeking(usize),
    /// Positioned on `key` inside range `range`
    Valid { range: usize, key: Vec<u8> },
    Exhausted,
}

pub struct Cursor {
    env: Env,
    db: Database<Bytes, Bytes>,
    ranges: Vec<ScanRange>,
    state: CursorState,
}

impl Cursor {
    pub fn new(env: Env, db: Database<Bytes, Bytes>, ranges: Vec<ScanRange>) -> Self {
        Self {
            env,
            db,
            ranges,
            state: CursorState::Unstarted,
        }
    }

    /// Move to the next record and return its key and value, or `None` once
    /// every range is exhausted.
    pub fn advance(&mut self) -> heed::Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let (index, after) = match &self.state {
                CursorState::Unstarted => {
                    self.state = self.enter(0);
                    continue;
                }
                CursorState::Seeking(i) => (*i, None),
                CursorState::Valid { range, key } => (*range, Some(key.clone())),
                CursorState::Exhausted => return Ok(None),
            };

            let range = &self.ranges[index];
            let found = {
                let rtxn = self.env.read_txn()?;
                let lower = match &after {
                    Some(key) => Bound::Excluded(key.as_slice()),
                    None => Bound::Included(range.start.as_slice()),
                };
                let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);
                let mut iter = self.db.range(&rtxn, &bounds)?;
                let next = iter.next().transpose()?;
                let found = match next {
                    Some((key, value)) if range.contains(key) => Some((key.to_vec(), value.to_vec())),
                    _ => None,
                };
                found
            };

            match found {
                Some((key, value)) => {
                    self.state = CursorState::Valid {
                        range: index,
                        key: key.clone(),
                    };
                    return Ok(Some((key, value)));
                }
                None => self.state = self.enter(index + 1),
            }
        }
    }

    /// Abandon the current range and continue with the next one.
    pub fn skip_to_next_range(&mut self) {
        let next = match &self.state {
            CursorState::Unstarted => 1,
            CursorState::Seeking(i) => i + 1,
            CursorState::Valid { range, .. } => range + 1,
            CursorState::Exhausted => return,
        };
        self.state = self.enter(next);
    }

    /// Index of the range the cursor is positioned in.
    pub fn current_range(&self) -> Option<usize> {
        match &self.state {
            CursorState::Valid { range, .. } => Some(*range),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Stop the scan; later calls to `advance` return `None`.
    pub fn finish(&mut self) {
        self.state = CursorState::Exhausted;
    }

    fn enter(&self, index: usize) -> CursorState {
        if index < self.ranges.len() {
            CursorState::Seeking(index)
        } else {
            CursorState::Exhausted
        }
    }
}
