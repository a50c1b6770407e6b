use std::{fmt, io};

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// Entries start at index 1. Index 0 is the position "before the first entry" and is what an
/// empty log reports as its last index.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default)]
pub struct Index(u64);

impl Index {
    pub const ZERO: Index = Index(0);

    pub fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.0 + delta)
    }

    /// Saturates at zero.
    pub fn minus(&self, delta: u64) -> Index {
        Index::new(self.0.saturating_sub(delta))
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        match self.0.checked_sub(delta) {
            Some(0) | None => None,
            Some(v) => Some(Index::new(v)),
        }
    }

    /// Number of entries between `self` and `other`. Zero if `other` is ahead.
    pub fn distance_from(&self, other: Index) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log is an append only log intended for use as a replicated commit log.
///
/// Log indexes entries starting from 1. The retained window is `[first_index, next_index)`.
/// Compaction moves `first_index` forward; it never changes the index assigned to an entry.
pub trait Log<E: Entry>: Send {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index. Returns `None` for compacted or not yet written indexes.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Deletes anything starting at `index` and later.
    fn truncate(&mut self, index: Index) -> Result<(), io::Error>;

    /// Deletes anything up to and including `index`. Entries after `index` keep their indexes.
    fn compact(&mut self, index: Index) -> Result<(), io::Error>;

    /// Deletes everything. The next append will be written at `next_index`.
    fn reset(&mut self, next_index: Index) -> Result<(), io::Error>;

    /// first_index returns the lowest retained index. Equal to `next_index()` when empty.
    fn first_index(&self) -> Index;

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;

    fn last_index(&self) -> Index {
        self.next_index().minus(1)
    }

    fn is_empty(&self) -> bool {
        self.first_index() == self.next_index()
    }
}

pub trait Entry: Clone + Send + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic() {
        let i = Index::new(5);
        assert_eq!(i.plus(2), Index::new(7));
        assert_eq!(i.minus(2), Index::new(3));
        assert_eq!(i.minus(9), Index::ZERO);
        assert_eq!(i.checked_minus(4), Some(Index::new(1)));
        assert_eq!(i.checked_minus(5), None);
        assert_eq!(i.checked_minus(6), None);
        assert_eq!(i.distance_from(Index::new(2)), 3);
        assert_eq!(Index::new(2).distance_from(i), 0);
        assert!(Index::ZERO.is_zero());
        assert!(Index::start_index() > Index::ZERO);
    }
}
