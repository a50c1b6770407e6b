use crate::commitlog::{Entry, Index, Log};
use std::collections::VecDeque;
use std::{cmp, io};

// Durability is the storage collaborator's job. This models the retained window of a log so the
// raft layer can be exercised end to end.
pub struct InMemoryLog<E: Entry> {
    entries: VecDeque<E>,
    // Index of `entries[0]`.
    first_index: Index,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn new() -> Self {
        InMemoryLog {
            entries: VecDeque::new(),
            first_index: Index::start_index(),
        }
    }

    fn offset(&self, index: Index) -> Option<usize> {
        if index < self.first_index || index >= self.next_index() {
            return None;
        }

        Some(index.distance_from(self.first_index) as usize)
    }
}

impl<E: Entry> Default for InMemoryLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let index = self.next_index();
        self.entries.push_back(entry);

        Ok(index)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        Ok(self.offset(index).and_then(|o| self.entries.get(o)).cloned())
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if index <= self.first_index {
            self.entries.clear();
        } else if let Some(offset) = self.offset(index) {
            self.entries.truncate(offset);
        }

        Ok(())
    }

    fn compact(&mut self, index: Index) -> Result<(), io::Error> {
        if index < self.first_index {
            return Ok(());
        }

        let num_to_drop = cmp::min(index.plus(1).distance_from(self.first_index), self.entries.len() as u64);
        self.entries.drain(..num_to_drop as usize);
        self.first_index = self.first_index.plus(num_to_drop);

        Ok(())
    }

    fn reset(&mut self, next_index: Index) -> Result<(), io::Error> {
        self.entries.clear();
        self.first_index = if next_index.is_zero() {
            Index::start_index()
        } else {
            next_index
        };

        Ok(())
    }

    fn first_index(&self) -> Index {
        self.first_index
    }

    fn next_index(&self) -> Index {
        self.first_index.plus(self.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Entry for u32 {}

    fn log_with(n: u32) -> InMemoryLog<u32> {
        let mut log = InMemoryLog::new();
        for v in 1..=n {
            log.append(v).unwrap();
        }
        log
    }

    #[test]
    fn append_and_read() {
        let mut log = InMemoryLog::new();
        assert!(log.is_empty());
        assert_eq!(log.last_index(), Index::ZERO);
        assert_eq!(log.append(10u32).unwrap(), Index::new(1));
        assert_eq!(log.append(20u32).unwrap(), Index::new(2));

        assert_eq!(log.read(Index::new(1)).unwrap(), Some(10));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(20));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
        assert_eq!(log.read(Index::ZERO).unwrap(), None);
        assert_eq!(log.last_index(), Index::new(2));
    }

    #[test]
    fn truncate_removes_suffix() {
        let mut log = log_with(5);
        log.truncate(Index::new(3)).unwrap();
        assert_eq!(log.next_index(), Index::new(3));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(2));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);

        // Truncating beyond the end is a no-op.
        log.truncate(Index::new(10)).unwrap();
        assert_eq!(log.next_index(), Index::new(3));
    }

    #[test]
    fn compact_keeps_indexes_stable() {
        let mut log = log_with(10);
        log.compact(Index::new(4)).unwrap();

        assert_eq!(log.first_index(), Index::new(5));
        assert_eq!(log.next_index(), Index::new(11));
        assert_eq!(log.read(Index::new(4)).unwrap(), None);
        assert_eq!(log.read(Index::new(5)).unwrap(), Some(5));
        assert_eq!(log.append(11).unwrap(), Index::new(11));

        // Compacting an already compacted prefix is a no-op.
        log.compact(Index::new(2)).unwrap();
        assert_eq!(log.first_index(), Index::new(5));
    }

    #[test]
    fn compact_past_end_empties_log() {
        let mut log = log_with(3);
        log.compact(Index::new(7)).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.first_index(), Index::new(4));
        assert_eq!(log.next_index(), Index::new(4));
    }

    #[test]
    fn truncate_after_compaction() {
        let mut log = log_with(10);
        log.compact(Index::new(5)).unwrap();
        log.truncate(Index::new(8)).unwrap();
        assert_eq!(log.next_index(), Index::new(8));
        log.truncate(Index::new(2)).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.next_index(), Index::new(6));
    }

    #[test]
    fn reset_moves_next_index() {
        let mut log = log_with(3);
        log.reset(Index::new(101)).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.next_index(), Index::new(101));
        assert_eq!(log.append(42).unwrap(), Index::new(101));
        assert_eq!(log.first_index(), Index::new(101));
    }
}
