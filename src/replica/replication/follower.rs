use crate::commitlog::{Index, Log};
use crate::replica::configuration::Configuration;
use crate::replica::election::Role;
use crate::replica::errors::FatalError;
use crate::replica::local_state::PersistentLocalState;
use crate::replica::messages::{
    AppendRequest, AppendResponse, ConfigurationResponse, ConfigureRequest, ErrorKind, ResponseStatus,
};
use crate::replica::replica::{Replica, TermCheck};
use crate::replica::write_ahead_log::RaftLogEntry;
use std::cmp;

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    /// > Receiver implementation:
    /// > 1. Reply false if term < currentTerm (§5.1)
    /// > 2. Reply false if log doesn’t contain an entry at prevLogIndex
    /// > whose term matches prevLogTerm (§5.3)
    /// > 3. If an existing entry conflicts with a new one (same index
    /// > but different terms), delete the existing entry and all that
    /// > follow it (§5.3)
    /// > 4. Append any new entries not already in the log
    /// > 5. If leaderCommit > commitIndex, set commitIndex =
    /// > min(leaderCommit, index of last new entry)
    pub(crate) fn handle_append(&mut self, request: AppendRequest) -> Result<AppendResponse, FatalError> {
        if let TermCheck::Stale(_) = self.observe_term(request.term)? {
            return Ok(self.append_response(false, self.log.last_index()));
        }

        if self.role.role().is_leader() {
            slog::error!(
                self.logger,
                "Received append from {} while leading term {:?}",
                request.leader,
                request.term
            );
            return Ok(AppendResponse {
                status: ResponseStatus::error(ErrorKind::IllegalMemberState),
                ..self.append_response(false, self.log.last_index())
            });
        }

        self.accept_leader(&request.leader);
        // A leader that's sending entries gave up on the snapshot transfer.
        self.abort_receiving_snapshot();

        if !self.cluster.has_configuration() {
            slog::debug!(self.logger, "No configuration yet, rejecting append");
            return Ok(self.append_response(false, self.log.last_index()));
        }

        // 2.
        let last_index = self.log.last_index();
        let snapshot_index = self.log.snapshot_index();
        if request.prev_log_index > last_index {
            return Ok(self.append_response(false, last_index));
        }
        if !request.prev_log_index.is_zero() && request.prev_log_index > snapshot_index {
            let term = self.log.term_at(request.prev_log_index).map_err(FatalError::LogIo)?;
            if term != Some(request.prev_log_term) {
                slog::debug!(
                    self.logger,
                    "Log mismatch at {:?}: have {:?}, leader has {:?}",
                    request.prev_log_index,
                    term,
                    request.prev_log_term
                );
                return Ok(self.append_response(false, request.prev_log_index.minus(1)));
            }
        }

        // Passive members only take what the leader already knows is committed.
        let append_limit = match self.role.role() {
            Role::Passive | Role::Learner => Some(request.commit_index),
            _ => None,
        };

        // 3. and 4.
        let mut configuration_changed = false;
        let mut last_new_index = request.prev_log_index;
        for entry in request.entries {
            let index = last_new_index.plus(1);
            if append_limit.map(|limit| index > limit).unwrap_or(false) {
                break;
            }
            last_new_index = index;

            if index <= snapshot_index {
                continue;
            }

            if index <= self.log.last_index() {
                let existing_term = self.log.term_at(index).map_err(FatalError::LogIo)?;
                if existing_term == Some(entry.term) {
                    continue;
                }

                slog::info!(
                    self.logger,
                    "Truncating log at {:?}, conflicting term {:?} vs leader's {:?}",
                    index,
                    existing_term,
                    entry.term
                );
                self.log.truncate(index)?;
                configuration_changed |= self.cluster.truncate(index);
            }

            let configuration = entry.configuration().cloned();
            self.log.append_at(index, entry)?;
            if let Some(configuration) = configuration {
                self.cluster.append(configuration);
                configuration_changed = true;
            }
        }

        if configuration_changed {
            self.align_role_with_membership(false);
        }

        // 5.
        let new_commit_index = cmp::min(request.commit_index, last_new_index);
        if self.log.ratchet_fwd_commit_index(new_commit_index) {
            self.apply_commits()?;
        }

        Ok(self.append_response(true, self.log.last_index()))
    }

    fn append_response(&self, succeeded: bool, last_log_index: Index) -> AppendResponse {
        AppendResponse {
            status: ResponseStatus::Ok,
            term: self.local_state.current_term(),
            succeeded,
            last_log_index,
            last_snapshot_index: self.log.snapshot_index(),
            configuration_index: self.cluster.configuration_index(),
        }
    }

    /// The leader pushing its configuration to a member that's behind on it, e.g. a member
    /// that's joining and has no configuration at all.
    pub(crate) fn handle_configure(&mut self, request: ConfigureRequest) -> Result<ConfigurationResponse, FatalError> {
        if let TermCheck::Stale(current_term) = self.observe_term(request.term)? {
            return Ok(ConfigurationResponse::rejected_at_term(
                ResponseStatus::error(ErrorKind::IllegalMemberState),
                current_term,
            ));
        }

        if self.role.role().is_leader() {
            return Ok(ConfigurationResponse::error(ResponseStatus::error(
                ErrorKind::IllegalMemberState,
            )));
        }

        self.accept_leader(&request.leader);

        if !self.cluster.has_configuration() || request.index > self.cluster.configuration_index() {
            slog::info!(
                self.logger,
                "Installing configuration {:?} from {}",
                request.index,
                request.leader
            );
            self.cluster.install(Configuration {
                index: request.index,
                term: request.configuration_term,
                timestamp: request.timestamp,
                members: request.members,
                force: false,
            });

            match self.cluster.commit(self.log.commit_index()) {
                Some(committed) => self.on_configuration_committed(committed)?,
                None => self.align_role_with_membership(false),
            }
        }

        Ok(match self.cluster.effective() {
            Some(configuration) => ConfigurationResponse::ok(configuration),
            None => ConfigurationResponse::error(ResponseStatus::error(ErrorKind::IllegalMemberState)),
        })
    }
}
