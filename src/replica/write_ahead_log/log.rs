use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::errors::FatalError;
use crate::replica::local_state::Term;
use crate::replica::write_ahead_log::RaftLogEntry;
use std::io;
use std::ops::RangeInclusive;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has been handed to commit listeners
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
///
/// Entries at or below the snapshot index may have been compacted away. For those the snapshot's
/// (index, term) stands in for the missing entry.
pub(crate) struct WriteAheadLog<L>
where
    L: commitlog::Log<RaftLogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Term of the last entry in `log`, if any.
    term_of_last_entry: Option<Term>,
    // (index, term) of the latest snapshot. Zero if none.
    snapshot: (Index, Term),

    // Index of highest log entry known to be committed.
    commit_index: Index,
    // Index of highest log entry handed to commit listeners.
    last_applied_index: Index,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<RaftLogEntry>,
{
    pub(crate) fn new(logger: slog::Logger, mut log: L, snapshot: Option<(Index, Term)>) -> Result<Self, io::Error> {
        let snapshot = snapshot.unwrap_or((Index::ZERO, Term::ZERO));

        // The log must continue right where the snapshot ends, or overlap it. Anything else is
        // left over from an interrupted snapshot install.
        if !snapshot.0.is_zero() {
            let expected_next = snapshot.0.plus(1);
            if log.next_index() < expected_next || log.first_index() > expected_next {
                slog::warn!(
                    logger,
                    "Log [{:?}, {:?}) doesn't line up with snapshot at {:?}. Resetting log.",
                    log.first_index(),
                    log.next_index(),
                    snapshot.0
                );
                log.reset(expected_next)?;
            }
        }

        let term_of_last_entry = if log.is_empty() {
            None
        } else {
            log.read(log.last_index())?.map(|e| e.term)
        };

        // Anything covered by the snapshot is known committed and applied.
        Ok(WriteAheadLog {
            logger,
            log,
            term_of_last_entry,
            snapshot,
            commit_index: snapshot.0,
            last_applied_index: snapshot.0,
        })
    }

    /// (term, index) of the latest entry, falling back to the snapshot when the log is empty.
    pub(crate) fn latest_entry(&self) -> (Term, Index) {
        match self.term_of_last_entry {
            Some(term) => (term, self.log.last_index()),
            None => (self.snapshot.1, self.snapshot.0),
        }
    }

    pub(crate) fn last_index(&self) -> Index {
        self.latest_entry().1
    }

    pub(crate) fn first_index(&self) -> Index {
        self.log.first_index()
    }

    pub(crate) fn next_index(&self) -> Index {
        self.last_index().plus(1)
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<RaftLogEntry>, io::Error> {
        self.log.read(index)
    }

    /// Term of the entry at `index`. Index 0 has term 0, and the snapshot index has the snapshot's
    /// term. `None` if the entry is neither in the log nor the snapshot.
    pub(crate) fn term_at(&self, index: Index) -> Result<Option<Term>, io::Error> {
        if index.is_zero() {
            return Ok(Some(Term::ZERO));
        }
        if index == self.snapshot.0 {
            return Ok(Some(self.snapshot.1));
        }

        Ok(self.read(index)?.map(|e| e.term))
    }

    pub(crate) fn append(&mut self, entry: RaftLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.term_of_last_entry = Some(appended_term);

        Ok(appended_index)
    }

    /// Append an entry received from a leader, which must land at `expected_index`.
    pub(crate) fn append_at(&mut self, expected_index: Index, entry: RaftLogEntry) -> Result<(), FatalError> {
        let next_index = self.log.next_index();
        if next_index != expected_index {
            return Err(FatalError::LogInconsistent {
                expected: expected_index,
                actual: next_index,
            });
        }

        let appended_index = self.append(entry).map_err(FatalError::LogIo)?;
        if appended_index != expected_index {
            return Err(FatalError::LogInconsistent {
                expected: expected_index,
                actual: appended_index,
            });
        }

        Ok(())
    }

    /// Remove anything starting at `index` and later. Committed entries can't be removed.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), FatalError> {
        if index <= self.commit_index {
            return Err(FatalError::TruncateCommitted {
                index,
                commit_index: self.commit_index,
            });
        }

        self.log.truncate(index).map_err(FatalError::LogIo)?;
        self.term_of_last_entry = if self.log.is_empty() {
            None
        } else {
            self.log
                .read(self.log.last_index())
                .map_err(FatalError::LogIo)?
                .map(|e| e.term)
        };

        Ok(())
    }

    /// Drop entries covered by the snapshot, up to `index`.
    pub(crate) fn compact(&mut self, index: Index) -> Result<Index, io::Error> {
        let compact_to = std::cmp::min(index, self.snapshot.0);
        if compact_to.is_zero() {
            return Ok(Index::ZERO);
        }

        self.log.compact(compact_to)?;
        if self.log.is_empty() {
            self.term_of_last_entry = None;
        }
        Ok(compact_to)
    }

    /// Throw away the whole log. The next entry will be written at `snapshot_index + 1`.
    pub(crate) fn reset_to_snapshot(&mut self, snapshot_index: Index, snapshot_term: Term) -> Result<(), io::Error> {
        self.log.reset(snapshot_index.plus(1))?;
        self.term_of_last_entry = None;
        self.snapshot = (snapshot_index, snapshot_term);

        Ok(())
    }

    pub(crate) fn set_snapshot(&mut self, snapshot_index: Index, snapshot_term: Term) {
        if snapshot_index > self.snapshot.0 {
            self.snapshot = (snapshot_index, snapshot_term);
        }
    }

    pub(crate) fn snapshot_index(&self) -> Index {
        self.snapshot.0
    }

    /// (index, term) of the latest snapshot.
    pub(crate) fn snapshot(&self) -> (Index, Term) {
        self.snapshot
    }

    pub(crate) fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub(crate) fn last_applied_index(&self) -> Index {
        self.last_applied_index
    }

    /// Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> bool {
        // Never mark as committed an entry we don't have locally.
        let last_index = self.last_index();
        let new_commit_index = if new_commit_index > last_index {
            slog::warn!(
                self.logger,
                "Clamping commit index {:?} to last log index {:?}",
                new_commit_index,
                last_index
            );
            last_index
        } else {
            new_commit_index
        };

        if new_commit_index <= self.commit_index {
            return false;
        }

        self.commit_index = new_commit_index;
        true
    }

    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if tentative_new_commit_index <= self.commit_index {
            return Ok(false);
        }

        match self.term_at(tentative_new_commit_index)? {
            Some(term) if term == current_term => Ok(self.ratchet_fwd_commit_index(tentative_new_commit_index)),
            _ => Ok(false),
        }
    }

    /// Hands out the committed-but-unapplied range and marks it applied.
    pub(crate) fn take_unapplied(&mut self) -> Option<RangeInclusive<u64>> {
        if self.commit_index <= self.last_applied_index {
            return None;
        }

        let range = self.last_applied_index.plus(1).as_u64()..=self.commit_index.as_u64();
        self.last_applied_index = self.commit_index;
        Some(range)
    }

    pub(crate) fn into_inner(self) -> L {
        self.log
    }
}
