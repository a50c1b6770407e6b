use crate::commitlog::{Index, Log};
use crate::replica::callback::Callback;
use crate::replica::election::Role;
use crate::replica::errors::{FatalError, ReadError};
use crate::replica::local_state::PersistentLocalState;
use crate::replica::replica::Replica;
use crate::replica::replication::PendingRead;
use crate::replica::write_ahead_log::RaftLogEntry;

/// How fresh a read needs to be. Reads resolve to an index; the caller reads its state machine
/// once it has applied that far.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Whatever this replica has applied. May be stale, never goes backwards.
    Sequential,
    /// Leader's commit index, after a quorum confirmed it's still leader.
    Linearizable,
    /// Leader's commit index, trusting a recent quorum ack instead of a fresh round trip.
    LinearizableLease,
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub fn read(&mut self, consistency: ReadConsistency, callback: Callback<Result<Index, ReadError>>) {
        let result = self.register_read(consistency, callback);
        self.fail_on_error(result);
    }

    fn register_read(
        &mut self,
        consistency: ReadConsistency,
        callback: Callback<Result<Index, ReadError>>,
    ) -> Result<(), FatalError> {
        if self.role.role() == Role::Inactive {
            callback.send(Err(ReadError::Inactive));
            return Ok(());
        }

        if consistency == ReadConsistency::Sequential {
            callback.send(Ok(self.log.last_applied_index()));
            return Ok(());
        }

        let now = self.scheduler.now();
        let commit_index = self.log.commit_index();
        let voters = self.effective_voters();
        let lease_duration = self.options.leader_lease_duration;
        let leader_state = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => {
                let error = match &self.leader {
                    Some(leader) => ReadError::NotLeader(leader.clone()),
                    None => ReadError::NoLeader,
                };
                callback.send(Err(error));
                return Ok(());
            }
        };

        // Until an entry of this term commits, the commit index could be behind a prior leader's.
        if leader_state.is_initializing(commit_index) {
            callback.send(Err(ReadError::LeaderInitializing));
            return Ok(());
        }

        if consistency == ReadConsistency::LinearizableLease {
            let lease_holds = leader_state
                .quorum_ack_instant(&voters, &self.my_member_id, now)
                .map(|acked_at| now.saturating_duration_since(acked_at) < lease_duration)
                .unwrap_or(false);
            if lease_holds {
                callback.send(Ok(commit_index));
                return Ok(());
            }
        }

        leader_state.pending_reads.push(PendingRead {
            registered_at: now,
            deadline: now + self.options.election_timeout_max,
            callback,
        });

        // A single voter confirms its own leadership.
        self.complete_reads();
        self.replicate_to_all()
    }

    /// Resolve reads that a quorum has confirmed since they were registered.
    pub(crate) fn complete_reads(&mut self) {
        let now = self.scheduler.now();
        let commit_index = self.log.commit_index();
        let voters = self.effective_voters();
        if let Some(leader_state) = self.role.leader_state_mut() {
            if leader_state.pending_reads.is_empty() {
                return;
            }
            if let Some(confirmed_at) = leader_state.quorum_ack_instant(&voters, &self.my_member_id, now) {
                leader_state.complete_reads(confirmed_at, commit_index);
            }
        }
    }
}
