//! Membership changes. Join, Leave and Reconfigure go through the log one voter at a time, so
//! the old and new majorities always overlap. ForceConfigure is the operator's escape hatch for
//! when no majority is left, and gives up that guarantee.

use crate::commitlog::{Index, Log};
use crate::replica::callback::Callback;
use crate::replica::configuration::Configuration;
use crate::replica::errors::FatalError;
use crate::replica::local_state::PersistentLocalState;
use crate::replica::messages::{
    ConfigurationResponse, ErrorKind, ForceConfigureRequest, ForceConfigureResponse, JoinRequest, LeaveRequest,
    RaftResponse, ReconfigureRequest, ResponseStatus,
};
use crate::replica::peers::{MemberId, RaftMember};
use crate::replica::replica::{Replica, TermCheck};
use crate::replica::replication::{ConfigurationChange, PendingConfiguration};
use crate::replica::write_ahead_log::{EntryPayload, RaftLogEntry};
use std::cmp;
use std::collections::HashSet;

pub(crate) enum MembershipChange {
    Join(JoinRequest),
    Leave(LeaveRequest),
    Reconfigure(ReconfigureRequest),
}

impl MembershipChange {
    fn kind(&self) -> ConfigurationChange {
        match self {
            MembershipChange::Join(_) => ConfigurationChange::Join,
            MembershipChange::Leave(_) => ConfigurationChange::Leave,
            MembershipChange::Reconfigure(_) => ConfigurationChange::Reconfigure,
        }
    }
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    /// Replies once the new configuration is committed, or right away if it's refused.
    pub(crate) fn handle_membership_change(
        &mut self,
        change: MembershipChange,
        callback: Callback<RaftResponse>,
    ) -> Result<(), FatalError> {
        let kind = change.kind();
        let joining = match &change {
            MembershipChange::Join(request) => Some(request.member.id.clone()),
            _ => None,
        };
        let members = match self.plan_membership_change(change) {
            Ok(Some(members)) => members,
            Ok(None) => {
                // A known member joining again is back up. Don't wait out its backoff.
                if let Some(id) = joining {
                    if let Some(peer) = self.role.leader_state_mut().and_then(|l| l.tracker.get_mut(&id)) {
                        peer.failure_count = 0;
                    }
                }

                // No-op change. Reply with what we have.
                let response = match self.cluster.effective() {
                    Some(configuration) => ConfigurationResponse::ok(configuration),
                    None => ConfigurationResponse::error(ResponseStatus::error(ErrorKind::ConfigurationError)),
                };
                callback.send(kind.response(response));
                return Ok(());
            }
            Err(status) => {
                slog::info!(self.logger, "Refusing {:?} membership change: {:?}", kind, status);
                callback.send(kind.response(ConfigurationResponse::error(status)));
                return Ok(());
            }
        };

        let term = self.local_state.current_term();
        let index = self.log.next_index();
        let configuration = Configuration::new(index, term, members);

        // Registered before the append so a single voter committing on the spot resolves it.
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.configuring = Some(PendingConfiguration {
                configuration: configuration.clone(),
                kind,
                callback,
            });
        }

        slog::info!(
            self.logger,
            "Proposing configuration {:?}: {:?}",
            index,
            configuration.members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
        );
        self.log.append_at(
            index,
            RaftLogEntry::new(term, EntryPayload::Configuration(configuration.clone())),
        )?;
        self.cluster.append(configuration);
        self.sync_peers();

        self.replicate_to_all()?;
        self.try_commit()
    }

    /// The member list the change leads to. `Ok(None)` if nothing would change.
    fn plan_membership_change(&self, change: MembershipChange) -> Result<Option<Vec<RaftMember>>, ResponseStatus> {
        let leader_state = match self.role.leader_state() {
            Some(leader_state) => leader_state,
            None => return Err(ResponseStatus::no_leader(self.leader.clone())),
        };

        if leader_state.is_initializing(self.log.commit_index()) {
            return Err(ResponseStatus::error_with_message(
                ErrorKind::Unavailable,
                "Leader is still initializing",
            ));
        }

        if self.cluster.is_change_in_flight() || leader_state.configuring.is_some() {
            return Err(ResponseStatus::error_with_message(
                ErrorKind::ConfigurationError,
                "Another configuration change is in progress",
            ));
        }

        let current = match self.cluster.effective() {
            Some(current) => current,
            None => {
                return Err(ResponseStatus::error_with_message(
                    ErrorKind::ConfigurationError,
                    "No configuration",
                ))
            }
        };

        let members = match change {
            MembershipChange::Join(request) => {
                // Already a member, whatever type it asks for. Type changes go through Reconfigure.
                if current.contains(&request.member.id) {
                    return Ok(None);
                }
                let mut members = current.members.clone();
                members.push(request.member);
                members
            }
            MembershipChange::Leave(request) => current
                .members
                .iter()
                .filter(|m| m.id != request.member)
                .cloned()
                .collect(),
            MembershipChange::Reconfigure(request) => {
                let stale =
                    request.index < current.index || (request.index == current.index && request.term != current.term);
                if stale {
                    return Err(ResponseStatus::error_with_message(
                        ErrorKind::ConfigurationError,
                        format!(
                            "Stale configuration ({:?}, {:?}), current is ({:?}, {:?})",
                            request.index, request.term, current.index, current.term
                        ),
                    ));
                }
                request.members
            }
        };

        if current.same_members(&members) {
            return Ok(None);
        }

        if members.is_empty() {
            return Err(ResponseStatus::error_with_message(
                ErrorKind::ConfigurationError,
                "Configuration can't be empty",
            ));
        }

        let old_voters: HashSet<&MemberId> = current.voters().collect();
        let new_voters: HashSet<&MemberId> = members
            .iter()
            .filter(|m| m.member_type.is_voting())
            .map(|m| &m.id)
            .collect();
        if old_voters.symmetric_difference(&new_voters).count() > 1 {
            return Err(ResponseStatus::error_with_message(
                ErrorKind::ConfigurationError,
                "Only one voting member can be added or removed at a time",
            ));
        }

        // A voter that's being added has no track record. It'll be caught up by the time the
        // entry commits, since it's part of the majority that commits it.
        let now = self.scheduler.now();
        let healthy = new_voters
            .iter()
            .filter(|id| {
                if **id == &self.my_member_id || !old_voters.contains(*id) {
                    return true;
                }
                leader_state
                    .tracker
                    .get(**id)
                    .map(|peer| {
                        peer.is_healthy(
                            now,
                            self.options.election_timeout_max,
                            self.options.min_step_down_failure_count,
                        )
                    })
                    .unwrap_or(false)
            })
            .count();
        let quorum = Configuration::quorum_of(new_voters.len());
        if healthy < quorum {
            return Err(ResponseStatus::error_with_message(
                ErrorKind::QuorumUnsafe,
                format!("Only {} of {} voters are healthy, {} needed", healthy, new_voters.len(), quorum),
            ));
        }

        Ok(Some(members))
    }

    /// Start or stop tracking peers to match the effective configuration.
    pub(crate) fn sync_peers(&mut self) {
        let targets = self.cluster.replication_targets();
        let last_index = self.log.last_index();
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.sync_peers(&targets, last_index);
        }
    }

    pub(crate) fn handle_force_configure(
        &mut self,
        request: ForceConfigureRequest,
    ) -> Result<ForceConfigureResponse, FatalError> {
        slog::warn!(
            self.logger,
            "Force configuring {:?}, this can lose committed entries",
            request.members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
        );

        if let TermCheck::Stale(current_term) = self.observe_term(request.term)? {
            return Ok(ForceConfigureResponse {
                status: ResponseStatus::error_with_message(ErrorKind::IllegalMemberState, "Stale term"),
                index: Index::ZERO,
                term: current_term,
            });
        }

        if self.role.role().is_leader() {
            slog::warn!(self.logger, "Stepping down for forced configuration");
            self.become_follower(None);
        }

        let term = self.local_state.current_term();
        let error = |message: &str| ForceConfigureResponse {
            status: ResponseStatus::error_with_message(ErrorKind::ConfigurationError, message),
            index: Index::ZERO,
            term,
        };

        if let Some(current) = self.cluster.effective() {
            if current.force {
                if current.same_members(&request.members) {
                    return Ok(ForceConfigureResponse {
                        status: ResponseStatus::Ok,
                        index: current.index,
                        term: current.term,
                    });
                }
                return Ok(error("Already force configured with different members"));
            }
        }

        if request.index < self.cluster.committed_index() {
            return Ok(error("Older than the committed configuration"));
        }

        let configuration = Configuration {
            index: cmp::max(request.index, self.cluster.configuration_index().plus(1)),
            term,
            timestamp: request.timestamp,
            members: request.members,
            force: true,
        };
        self.local_state
            .store_configuration(&configuration)
            .map_err(FatalError::LocalState)?;

        let (index, term) = (configuration.index, configuration.term);
        self.cluster.install_committed(configuration);
        self.align_role_with_membership(true);

        Ok(ForceConfigureResponse {
            status: ResponseStatus::Ok,
            index,
            term,
        })
    }
}
