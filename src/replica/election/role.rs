use crate::replica::peers::MemberId;
use crate::replica::replication::LeaderState;
use crate::replica::timers::TimerHandle;
use std::collections::HashSet;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    /// Receives committed entries. Never votes or campaigns.
    Passive,
    Learner,
    /// Stopped, either because of a fatal error or because it was removed from the cluster.
    Inactive,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    /// Follower, candidate and leader take part in elections.
    pub fn is_active(&self) -> bool {
        matches!(self, Role::Follower | Role::Candidate | Role::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// RoleState holds state specific to the current role. It is replaced wholesale on every
/// transition; dropping the old one cancels its timers.
pub(crate) enum RoleState {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(Box<LeaderState>),
    Passive,
    Learner,
    Inactive,
}

impl RoleState {
    pub(crate) fn role(&self) -> Role {
        match self {
            RoleState::Follower(_) => Role::Follower,
            RoleState::Candidate(_) => Role::Candidate,
            RoleState::Leader(_) => Role::Leader,
            RoleState::Passive => Role::Passive,
            RoleState::Learner => Role::Learner,
            RoleState::Inactive => Role::Inactive,
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderState> {
        match self {
            RoleState::Leader(ls) => Some(ls),
            _ => None,
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        match self {
            RoleState::Leader(ls) => Some(ls),
            _ => None,
        }
    }
}

impl fmt::Debug for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleState::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            other => write!(f, "{:?}", other.role()),
        }
    }
}

pub(crate) struct FollowerState {
    _election_timer: TimerHandle,
}

impl FollowerState {
    pub(crate) fn new(election_timer: TimerHandle) -> Self {
        FollowerState {
            _election_timer: election_timer,
        }
    }

    /// Swap in a freshly scheduled timeout. Dropping the old handle cancels it.
    pub(crate) fn reset_timer(&mut self, election_timer: TimerHandle) {
        self._election_timer = election_timer;
    }
}

pub(crate) struct CandidateState {
    received_votes_from: HashSet<MemberId>,
    _election_timer: TimerHandle,
}

impl CandidateState {
    pub(crate) fn new(election_timer: TimerHandle) -> Self {
        CandidateState {
            received_votes_from: HashSet::with_capacity(3),
            _election_timer: election_timer,
        }
    }

    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    pub(crate) fn add_received_vote(&mut self, vote_from: MemberId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_votes_count_once() {
        let mut cs = CandidateState::new(TimerHandle::detached());
        assert_eq!(cs.add_received_vote(MemberId::new("a")), 1);
        assert_eq!(cs.add_received_vote(MemberId::new("b")), 2);
        assert_eq!(cs.add_received_vote(MemberId::new("a")), 2);
        assert_eq!(format!("{:?}", RoleState::Candidate(cs)), "Candidate(Votes=2)");
    }

    #[test]
    fn role_of_state() {
        assert_eq!(RoleState::Passive.role(), Role::Passive);
        assert!(RoleState::Inactive.leader_state().is_none());
        assert!(!Role::Learner.is_active());
        assert!(Role::Candidate.is_active());
    }
}
