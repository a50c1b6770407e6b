use crate::commitlog::Log;
use crate::replica::election::{CandidateState, Role, RoleState};
use crate::replica::errors::FatalError;
use crate::replica::local_state::PersistentLocalState;
use crate::replica::messages::{ErrorKind, RaftRequest, RaftResponse, ResponseStatus, VoteRequest, VoteResponse};
use crate::replica::replica::{Replica, TermCheck};
use crate::replica::transport::{OutboundRequest, ReplyFromPeer, RequestDescriptor};
use crate::replica::write_ahead_log::RaftLogEntry;

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    /// > Receiver implementation:
    /// > 1. Reply false if term < currentTerm (§5.1)
    /// > 2. If votedFor is null or candidateId, and candidate’s log is at
    /// > least as up-to-date as receiver’s log, grant vote (§5.2, §5.4)
    pub(crate) fn handle_vote(&mut self, request: VoteRequest) -> Result<VoteResponse, FatalError> {
        if matches!(self.role.role(), Role::Passive | Role::Learner) {
            return Ok(VoteResponse {
                status: ResponseStatus::error(ErrorKind::IllegalMemberState),
                term: self.local_state.current_term(),
                voted: false,
            });
        }

        let logger = self.logger.new(slog::o!("Candidate" => request.candidate.to_string()));

        // Removed members keep campaigning until they learn they're gone. Don't let them bump
        // everyone's term.
        if !self.cluster.is_voter(&request.candidate) {
            slog::info!(logger, "Denying vote to non-voting member");
            return Ok(self.vote_response(false));
        }

        if let TermCheck::Stale(_) = self.observe_term(request.term)? {
            return Ok(self.vote_response(false));
        }

        if self.role.role().is_leader() {
            return Ok(self.vote_response(false));
        }

        let (current_term, voted_for) = self.local_state.voted_for_current_term();
        if let Some(voted_for) = voted_for {
            return Ok(self.vote_response(voted_for == request.candidate));
        }

        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        if (request.last_log_term, request.last_log_index) < self.log.latest_entry() {
            slog::info!(
                logger,
                "Denying vote, candidate log ({:?}, {:?}) is behind ours {:?}",
                request.last_log_term,
                request.last_log_index,
                self.log.latest_entry()
            );
            return Ok(self.vote_response(false));
        }

        let granted = self
            .local_state
            .store_vote_for_term_if_unvoted(current_term, request.candidate.clone())
            .map_err(FatalError::LocalState)?;
        if granted {
            slog::info!(logger, "Voted for candidate in term {:?}", current_term);
            self.reset_election_timeout();
        }

        Ok(self.vote_response(granted))
    }

    fn vote_response(&self, voted: bool) -> VoteResponse {
        VoteResponse {
            status: ResponseStatus::Ok,
            term: self.local_state.current_term(),
            voted,
        }
    }

    pub(crate) fn handle_election_timeout(&mut self) -> Result<(), FatalError> {
        match self.role.role() {
            Role::Follower => {
                if self.election_timer.on_timeout() {
                    self.start_election()
                } else {
                    slog::debug!(
                        self.logger,
                        "Election timeout, waiting for higher priority members. Target priority {}",
                        self.election_timer.target_priority()
                    );
                    self.reset_election_timeout();
                    Ok(())
                }
            }
            Role::Candidate => {
                slog::info!(self.logger, "Election timed out without a winner");
                self.start_election()
            }
            _ => Ok(()),
        }
    }

    /// > On conversion to candidate, start election:
    /// > * Increment currentTerm
    /// > * Vote for self
    /// > * Reset election timer
    /// > * Send RequestVote RPCs to all other servers
    pub(crate) fn start_election(&mut self) -> Result<(), FatalError> {
        if !self.cluster.is_voter(&self.my_member_id) {
            slog::debug!(self.logger, "Not a voting member, skipping election");
            match self.role {
                RoleState::Follower(_) => self.reset_election_timeout(),
                _ => self.become_follower(None),
            }
            return Ok(());
        }

        let term = self
            .local_state
            .increment_term_and_vote_for_self()
            .map_err(FatalError::LocalState)?;
        self.metrics.term_changed(&self.my_member_id, term);
        self.metrics.election_started(&self.my_member_id, term);
        slog::info!(self.logger, "Starting election for term {:?}", term);

        self.leader = None;
        let epoch = self.next_epoch();
        let timer = self.schedule_election_timeout(epoch);
        let mut candidate = CandidateState::new(timer);
        let votes = candidate.add_received_vote(self.my_member_id.clone());
        self.set_role(RoleState::Candidate(candidate));

        if votes >= self.cluster.quorum() {
            return self.become_leader();
        }

        let (last_log_term, last_log_index) = self.log.latest_entry();
        for peer_id in self.cluster.voting_peers() {
            self.transport.send(OutboundRequest {
                descriptor: RequestDescriptor {
                    peer_id,
                    term,
                    seq_no: 0,
                },
                request: RaftRequest::Vote(VoteRequest {
                    term,
                    candidate: self.my_member_id.clone(),
                    last_log_index,
                    last_log_term,
                }),
            });
        }

        Ok(())
    }

    pub(crate) fn handle_vote_reply(&mut self, reply: ReplyFromPeer) -> Result<(), FatalError> {
        let peer_id = reply.descriptor.peer_id;
        let response = match reply.result {
            Ok(RaftResponse::Vote(response)) => response,
            Ok(other) => {
                slog::warn!(self.logger, "Unexpected reply to vote request from {}: {:?}", peer_id, other);
                return Ok(());
            }
            Err(e) => {
                // Not retried. If too few votes come back, the next election timeout starts over.
                slog::debug!(self.logger, "Vote request to {} failed: {}", peer_id, e);
                return Ok(());
            }
        };

        if response.term > self.local_state.current_term() {
            self.observe_term(response.term)?;
            return Ok(());
        }

        if !response.voted || !response.status.is_ok() || !self.cluster.is_voter(&peer_id) {
            return Ok(());
        }

        let quorum = self.cluster.quorum();
        let votes = match &mut self.role {
            RoleState::Candidate(candidate) => candidate.add_received_vote(peer_id.clone()),
            _ => return Ok(()),
        };
        slog::debug!(self.logger, "Received vote from {}, {} of {} needed", peer_id, votes, quorum);

        if votes >= quorum {
            self.become_leader()?;
        }

        Ok(())
    }
}
