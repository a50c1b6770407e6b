use crate::replica::configuration::Configuration;
use crate::replica::peers::MemberId;
use std::fmt;
use std::io;

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the Raft paper requires that something is persisted to a
/// durable store to guarantee safety. Not everything that uses disk has to go through this, only
/// algorithm-correctness-critical ones. The log and snapshots have their own stores.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state. A returned
/// `Err` means the write may not have reached durable storage, and the replica stops serving.
pub trait PersistentLocalState: Send {
    /// Set current term to `new_term` atomically, iff it is larger than current term. Clears the
    /// vote.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_term_if_increased(&mut self, new_term: Term) -> io::Result<bool>;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: MemberId) -> io::Result<bool>;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self) -> io::Result<Term>;

    fn store_configuration(&mut self, configuration: &Configuration) -> io::Result<()>;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<MemberId>);
    fn configuration(&self) -> Option<Configuration>;
}

// Currently, this is not persistent. It's just in memory. Restarts in tests hand the same instance
// back to a new replica, which is enough to model a process restart over durable state.
pub struct VolatileLocalState {
    current_term: Term,
    voted_for_this_term: Option<MemberId>,
    configuration: Option<Configuration>,
    my_member_id: MemberId,
}

impl VolatileLocalState {
    pub fn new(my_member_id: MemberId) -> Self {
        VolatileLocalState {
            current_term: Term::ZERO,
            voted_for_this_term: None,
            configuration: None,
            my_member_id,
        }
    }
}

// LOL @ that impl signature.
impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> io::Result<bool> {
        if new_term <= self.current_term {
            Ok(false)
        } else {
            self.current_term = new_term;
            self.voted_for_this_term = None;
            Ok(true)
        }
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: MemberId) -> io::Result<bool> {
        if expected_term == self.current_term && self.voted_for_this_term.is_none() {
            self.voted_for_this_term.replace(vote);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn increment_term_and_vote_for_self(&mut self) -> io::Result<Term> {
        self.current_term.incr();
        self.voted_for_this_term.replace(self.my_member_id.clone());

        Ok(self.current_term)
    }

    fn store_configuration(&mut self, configuration: &Configuration) -> io::Result<()> {
        self.configuration.replace(configuration.clone());
        Ok(())
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<MemberId>) {
        (self.current_term, self.voted_for_this_term.clone())
    }

    fn configuration(&self) -> Option<Configuration> {
        self.configuration.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_and_vote_cas() {
        let me = MemberId::new("me");
        let mut state = VolatileLocalState::new(me.clone());

        assert!(state.store_term_if_increased(Term::new(3)).unwrap());
        assert!(!state.store_term_if_increased(Term::new(3)).unwrap());
        assert!(!state.store_term_if_increased(Term::new(2)).unwrap());

        // Wrong term
        assert!(!state
            .store_vote_for_term_if_unvoted(Term::new(2), MemberId::new("a"))
            .unwrap());
        assert!(state
            .store_vote_for_term_if_unvoted(Term::new(3), MemberId::new("a"))
            .unwrap());
        // Already voted
        assert!(!state
            .store_vote_for_term_if_unvoted(Term::new(3), MemberId::new("b"))
            .unwrap());
        assert_eq!(state.voted_for_current_term(), (Term::new(3), Some(MemberId::new("a"))));

        // New term clears the vote.
        assert!(state.store_term_if_increased(Term::new(4)).unwrap());
        assert_eq!(state.voted_for_current_term(), (Term::new(4), None));

        assert_eq!(state.increment_term_and_vote_for_self().unwrap(), Term::new(5));
        assert_eq!(state.voted_for_current_term(), (Term::new(5), Some(me)));
    }
}
