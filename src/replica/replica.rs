use crate::api::RaftOptionsValidated;
use crate::commitlog::{Index, Log};
use crate::replica::callback::Callback;
use crate::replica::configuration::{ClusterState, Configuration};
use crate::replica::election::{
    self, ElectionTimer, FollowerState, Role, RoleChange, RoleChangeListener, RoleChangeNotifier, RoleState,
};
use crate::replica::errors::{FatalError, StartupError};
use crate::replica::listeners::{CommitListener, EntryValidator, FailureListener, MetricsSink, SnapshotReplicationListener};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::messages::{ErrorKind, RaftRequest, RaftResponse, ResponseStatus};
use crate::replica::peers::{MemberId, MemberType, RaftMember};
use crate::replica::reconfiguration::MembershipChange;
use crate::replica::replication::PendingSnapshot;
use crate::replica::timers::{Scheduler, TimerEvent, TimerHandle, TimerKind};
use crate::replica::transport::{RaftTransport, ReplyFromPeer};
use crate::replica::write_ahead_log::{RaftLogEntry, WriteAheadLog};
use crate::snapshot::{SnapshotError, SnapshotMetadata, SnapshotStore};
use bytes::Bytes;
use rand::rngs::StdRng;
use std::io;
use std::sync::Arc;

pub struct ReplicaConfig<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub logger: slog::Logger,
    pub my_member_id: MemberId,
    /// Bootstrap membership. Empty for a node that will join an existing cluster.
    pub initial_members: Vec<RaftMember>,
    pub log: L,
    pub local_state: S,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub transport: Box<dyn RaftTransport>,
    pub scheduler: Box<dyn Scheduler>,
    pub rng: StdRng,
    pub options: RaftOptionsValidated,
    pub entry_validator: Box<dyn EntryValidator>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// The raft context of a single member.
///
/// Replica is strictly single threaded: every request, peer reply and timer goes through `&mut
/// self`. Nothing in here blocks or awaits. Outbound requests go to the transport, timers go to the
/// scheduler, and both come back later as `handle_peer_reply()` and `handle_timer()` calls.
pub struct Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub(super) logger: slog::Logger,
    pub(super) my_member_id: MemberId,
    pub(super) options: RaftOptionsValidated,

    pub(super) local_state: S,
    pub(super) cluster: ClusterState,
    pub(super) log: WriteAheadLog<L>,
    pub(super) snapshot_store: Arc<dyn SnapshotStore>,

    pub(super) transport: Box<dyn RaftTransport>,
    pub(super) scheduler: Box<dyn Scheduler>,
    pub(super) rng: StdRng,
    pub(super) election_timer: ElectionTimer,
    pub(super) entry_validator: Box<dyn EntryValidator>,
    pub(super) metrics: Arc<dyn MetricsSink>,

    pub(super) role: RoleState,
    // Bumped on every role transition and every election timer re-arm. Timer events from an
    // older epoch are dropped.
    pub(super) epoch: u64,
    pub(super) leader: Option<MemberId>,
    pub(super) receiving_snapshot: Option<PendingSnapshot>,

    pub(super) commit_listeners: Vec<Box<dyn CommitListener>>,
    pub(super) failure_listeners: Vec<Box<dyn FailureListener>>,
    pub(super) snapshot_replication_listeners: Vec<Box<dyn SnapshotReplicationListener>>,
    role_change_notifier: RoleChangeNotifier,
    role_change_listener: RoleChangeListener,
    failed: bool,
}

/// Result of applying the term rule to an incoming term.
pub(crate) enum TermCheck {
    /// Sender is behind; reply with our term and change nothing.
    Stale(Term),
    Current,
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub fn new(config: ReplicaConfig<L, S>) -> Result<Self, StartupError> {
        let ReplicaConfig {
            logger,
            my_member_id,
            initial_members,
            log,
            mut local_state,
            snapshot_store,
            transport,
            scheduler,
            rng,
            options,
            entry_validator,
            metrics,
        } = config;

        let committed = match (local_state.configuration(), initial_members.is_empty()) {
            (Some(persisted), true) => Some(persisted),
            (Some(persisted), false) => {
                check_bootstrap_members(&persisted, &initial_members)?;
                Some(persisted)
            }
            (None, false) => {
                let bootstrap = Configuration::new(Index::ZERO, Term::ZERO, initial_members);
                local_state
                    .store_configuration(&bootstrap)
                    .map_err(StartupError::LocalState)?;
                Some(bootstrap)
            }
            // Joining. Wait for the leader to tell us the configuration.
            (None, true) => None,
        };

        let snapshot = snapshot_store.current_snapshot().map(|s| (s.index, s.term));
        let log = WriteAheadLog::new(logger.clone(), log, snapshot).map_err(StartupError::Log)?;

        // Configuration entries written after the last committed configuration are effective.
        let mut cluster = ClusterState::new(my_member_id.clone(), committed);
        let mut index = std::cmp::max(log.first_index(), cluster.committed_index().plus(1));
        while index <= log.last_index() {
            let entry = log.read(index).map_err(StartupError::Log)?;
            if let Some(configuration) = entry.as_ref().and_then(|e| e.configuration()) {
                cluster.append(configuration.clone());
            }
            index = index.plus(1);
        }
        cluster.commit(log.commit_index());

        let current_term = local_state.current_term();
        let (role_change_notifier, role_change_listener) = election::channel(RoleChange {
            role: Role::Inactive,
            term: current_term,
            leader: None,
        });

        slog::info!(
            logger,
            "Starting replica at term {:?} with log [{:?}, {:?}], snapshot {:?}, configuration {:?}",
            current_term,
            log.first_index(),
            log.last_index(),
            log.snapshot_index(),
            cluster.effective().map(|c| c.index)
        );

        let mut replica = Replica {
            logger,
            election_timer: ElectionTimer::new(&options),
            my_member_id,
            options,
            local_state,
            cluster,
            log,
            snapshot_store,
            transport,
            scheduler,
            rng,
            entry_validator,
            metrics,
            role: RoleState::Inactive,
            epoch: 0,
            leader: None,
            receiving_snapshot: None,
            commit_listeners: Vec::new(),
            failure_listeners: Vec::new(),
            snapshot_replication_listeners: Vec::new(),
            role_change_notifier,
            role_change_listener,
            failed: false,
        };

        match replica.cluster.my_type() {
            Some(MemberType::Active) => replica.become_follower(None),
            Some(MemberType::Learner) => replica.become_learner(),
            _ => replica.become_passive(),
        }

        Ok(replica)
    }

    pub fn handle_request(&mut self, request: RaftRequest, callback: Callback<RaftResponse>) {
        let current_term = self.local_state.current_term();
        if let RoleState::Inactive = self.role {
            callback.send(request.rejection(ResponseStatus::error(ErrorKind::IllegalMemberState), current_term));
            return;
        }

        if let Err(e) = request.validate() {
            slog::warn!(self.logger, "Rejecting invalid {} request: {}", request.name(), e);
            callback.send(request.rejection(
                ResponseStatus::error_with_message(ErrorKind::ProtocolError, e.to_string()),
                current_term,
            ));
            return;
        }

        self.dispatch_request(request, callback);
    }

    fn dispatch_request(&mut self, request: RaftRequest, callback: Callback<RaftResponse>) {
        let on_fatal = request.rejection(
            ResponseStatus::error(ErrorKind::IllegalMemberState),
            self.local_state.current_term(),
        );

        // Client-facing requests reply once their outcome is known, possibly much later.
        let result = match request {
            RaftRequest::Vote(r) => self.handle_vote(r).map(RaftResponse::Vote),
            RaftRequest::Append(r) => self.handle_append(r).map(RaftResponse::Append),
            RaftRequest::Install(r) => self.handle_install(r).map(RaftResponse::Install),
            RaftRequest::Configure(r) => self.handle_configure(r).map(RaftResponse::Configure),
            RaftRequest::ForceConfigure(r) => self.handle_force_configure(r).map(RaftResponse::ForceConfigure),
            RaftRequest::Join(r) => {
                let result = self.handle_membership_change(MembershipChange::Join(r), callback);
                return self.fail_on_error(result);
            }
            RaftRequest::Leave(r) => {
                let result = self.handle_membership_change(MembershipChange::Leave(r), callback);
                return self.fail_on_error(result);
            }
            RaftRequest::Reconfigure(r) => {
                let result = self.handle_membership_change(MembershipChange::Reconfigure(r), callback);
                return self.fail_on_error(result);
            }
            RaftRequest::Transfer(r) => {
                let result = self.handle_transfer(r, callback);
                return self.fail_on_error(result);
            }
        };

        match result {
            Ok(response) => callback.send(response),
            Err(e) => {
                callback.send(on_fatal);
                self.fail(e);
            }
        }
    }

    pub fn handle_peer_reply(&mut self, reply: ReplyFromPeer) {
        if let RoleState::Inactive = self.role {
            return;
        }

        let current_term = self.local_state.current_term();
        if reply.descriptor.term != current_term {
            slog::debug!(
                self.logger,
                "Dropping reply from {} for term {:?}, current term {:?}",
                reply.descriptor.peer_id,
                reply.descriptor.term,
                current_term
            );
            return;
        }

        // Votes aren't sequenced, replication requests start at 1.
        let result = if reply.descriptor.seq_no == 0 {
            self.handle_vote_reply(reply)
        } else {
            self.handle_replication_reply(reply)
        };
        self.fail_on_error(result);
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        if event.epoch != self.epoch {
            return;
        }

        let result = match event.kind {
            TimerKind::Election => self.handle_election_timeout(),
            TimerKind::Heartbeat => self.handle_heartbeat_tick(),
        };
        self.fail_on_error(result);
    }

    /// Persist a snapshot of the application state as of `index`, which must be committed. The log
    /// isn't compacted until `compact()` is called.
    pub fn take_snapshot(&mut self, index: Index, data: Bytes) -> Result<SnapshotMetadata, SnapshotError> {
        let commit_index = self.log.commit_index();
        if index > commit_index {
            return Err(SnapshotError::NotCommitted {
                requested: index,
                commit_index,
            });
        }
        if index <= self.log.snapshot_index() {
            return Err(SnapshotError::AlreadyExists(self.log.snapshot_index()));
        }

        let term = self.log.term_at(index)?.ok_or(SnapshotError::EntryUnavailable(index))?;
        let metadata = self
            .snapshot_store
            .take_snapshot(SnapshotMetadata::new(index, term), data)?;
        self.log.set_snapshot(metadata.index, metadata.term);
        slog::info!(self.logger, "Took snapshot {} at {:?}", metadata.id, metadata.index);

        Ok(metadata)
    }

    /// Drop log entries up to `index`, bounded by the latest snapshot. Returns the index compacted to.
    pub fn compact(&mut self, index: Index) -> io::Result<Index> {
        match self.log.compact(index) {
            Ok(compacted_to) => {
                slog::debug!(self.logger, "Compacted log up to {:?}", compacted_to);
                Ok(compacted_to)
            }
            Err(e) => {
                let reported = io::Error::new(e.kind(), e.to_string());
                self.fail(FatalError::LogIo(e));
                Err(reported)
            }
        }
    }

    pub fn add_commit_listener(&mut self, listener: Box<dyn CommitListener>) {
        self.commit_listeners.push(listener);
    }

    pub fn add_failure_listener(&mut self, listener: Box<dyn FailureListener>) {
        self.failure_listeners.push(listener);
    }

    pub fn add_snapshot_replication_listener(&mut self, listener: Box<dyn SnapshotReplicationListener>) {
        self.snapshot_replication_listeners.push(listener);
    }

    pub fn role_change_listener(&self) -> RoleChangeListener {
        self.role_change_listener.clone()
    }

    pub fn my_member_id(&self) -> &MemberId {
        &self.my_member_id
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn current_term(&self) -> Term {
        self.local_state.current_term()
    }

    pub fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref()
    }

    pub fn commit_index(&self) -> Index {
        self.log.commit_index()
    }

    pub fn last_applied(&self) -> Index {
        self.log.last_applied_index()
    }

    pub fn first_log_index(&self) -> Index {
        self.log.first_index()
    }

    pub fn last_log_index(&self) -> Index {
        self.log.last_index()
    }

    pub fn snapshot_index(&self) -> Index {
        self.log.snapshot_index()
    }

    /// The effective configuration, committed or not.
    pub fn configuration(&self) -> Option<&Configuration> {
        self.cluster.effective()
    }

    pub fn committed_configuration(&self) -> Option<&Configuration> {
        self.cluster.committed()
    }

    pub fn read_log_entry(&self, index: Index) -> io::Result<Option<RaftLogEntry>> {
        self.log.read(index)
    }

    /// Stop, and hand back the durable state so a new replica can be started over it.
    pub fn shutdown(mut self) -> (L, S) {
        slog::info!(self.logger, "Shutting down");
        self.become_inactive();

        let Replica { log, local_state, .. } = self;
        (log.into_inner(), local_state)
    }

    /// Applies the term rule. A newer term is persisted before anything else happens, and
    /// candidates and leaders fall back to follower.
    pub(super) fn observe_term(&mut self, term: Term) -> Result<TermCheck, FatalError> {
        let current_term = self.local_state.current_term();
        if term < current_term {
            return Ok(TermCheck::Stale(current_term));
        }

        if term > current_term {
            self.local_state
                .store_term_if_increased(term)
                .map_err(FatalError::LocalState)?;
            self.metrics.term_changed(&self.my_member_id, term);
            slog::info!(self.logger, "Observed term {:?}, was {:?}", term, current_term);

            self.leader = None;
            match self.role.role() {
                Role::Leader | Role::Candidate => self.become_follower(None),
                _ => self.publish_role_change(),
            }
        }

        Ok(TermCheck::Current)
    }

    /// A valid request from the leader of the current term.
    pub(super) fn accept_leader(&mut self, leader: &MemberId) {
        match self.role.role() {
            Role::Candidate => self.become_follower(Some(leader.clone())),
            Role::Follower => {
                self.set_leader(leader);
                self.reset_election_timeout();
            }
            Role::Passive | Role::Learner => self.set_leader(leader),
            Role::Leader | Role::Inactive => {}
        }
    }

    fn set_leader(&mut self, leader: &MemberId) {
        if self.leader.as_ref() != Some(leader) {
            slog::info!(self.logger, "New leader {} for term {:?}", leader, self.local_state.current_term());
            self.leader = Some(leader.clone());
            self.publish_role_change();
        }
    }

    pub(super) fn become_follower(&mut self, leader: Option<MemberId>) {
        self.leader = leader;
        self.election_timer.reset();
        let epoch = self.next_epoch();
        let timer = self.schedule_election_timeout(epoch);
        self.set_role(RoleState::Follower(FollowerState::new(timer)));
    }

    pub(super) fn become_passive(&mut self) {
        self.next_epoch();
        self.set_role(RoleState::Passive);
    }

    pub(super) fn become_learner(&mut self) {
        self.next_epoch();
        self.set_role(RoleState::Learner);
    }

    pub(super) fn become_inactive(&mut self) {
        self.next_epoch();
        self.set_role(RoleState::Inactive);
    }

    /// Re-arm a follower's election timeout, e.g. after hearing from the leader.
    pub(super) fn reset_election_timeout(&mut self) {
        if let RoleState::Follower(_) = self.role {
            let epoch = self.next_epoch();
            let timer = self.schedule_election_timeout(epoch);
            if let RoleState::Follower(follower) = &mut self.role {
                follower.reset_timer(timer);
            }
        }
    }

    pub(super) fn schedule_election_timeout(&mut self, epoch: u64) -> TimerHandle {
        let delay = self.election_timer.next_timeout(&mut self.rng);
        self.scheduler.schedule(
            delay,
            TimerEvent {
                epoch,
                kind: TimerKind::Election,
            },
        )
    }

    pub(super) fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Swap in the new role. Whatever the outgoing role had pending is failed.
    pub(super) fn set_role(&mut self, new_role: RoleState) {
        let old_role = std::mem::replace(&mut self.role, new_role);
        let (from, to) = (old_role.role(), self.role.role());
        if !to.is_leader() && self.leader.as_ref() == Some(&self.my_member_id) {
            self.leader = None;
        }

        if let RoleState::Leader(mut leader_state) = old_role {
            leader_state.fail_pending(self.leader.clone());
        }
        self.abort_receiving_snapshot();

        if from != to {
            slog::info!(
                self.logger,
                "{} -> {} at term {:?}",
                from,
                to,
                self.local_state.current_term()
            );
            self.metrics.role_changed(&self.my_member_id, to);
        }
        self.publish_role_change();
    }

    pub(super) fn publish_role_change(&self) {
        self.role_change_notifier.notify_new_state(RoleChange {
            role: self.role.role(),
            term: self.local_state.current_term(),
            leader: self.leader.clone(),
        });
    }

    /// Hand newly committed entries to the commit listeners, resolve the leader's pending work and
    /// promote committed configurations.
    pub(super) fn apply_commits(&mut self) -> Result<(), FatalError> {
        let range = match self.log.take_unapplied() {
            Some(range) => range,
            None => return Ok(()),
        };

        for index in range.map(Index::new) {
            // Nothing to read below the snapshot when the log was compacted or reset.
            let entry = self.log.read(index).map_err(FatalError::LogIo)?;
            for listener in self.commit_listeners.iter_mut() {
                listener.on_commit(index, entry.as_ref());
            }
        }

        let commit_index = self.log.commit_index();
        self.metrics.commit_index_changed(&self.my_member_id, commit_index);
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.resolve_commits(commit_index);
        }

        if let Some(configuration) = self.cluster.commit(commit_index) {
            self.on_configuration_committed(configuration)?;
        }

        Ok(())
    }

    pub(super) fn on_configuration_committed(&mut self, configuration: Configuration) -> Result<(), FatalError> {
        slog::info!(
            self.logger,
            "Configuration {:?} committed: {:?}",
            configuration.index,
            configuration.members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
        );
        self.local_state
            .store_configuration(&configuration)
            .map_err(FatalError::LocalState)?;
        self.align_role_with_membership(true);
        Ok(())
    }

    /// Move to whatever role my member type in the effective configuration calls for. Leaving
    /// the cluster only happens once that's committed.
    pub(super) fn align_role_with_membership(&mut self, committed: bool) {
        if !self.cluster.has_configuration() {
            return;
        }

        match (self.role.role(), self.cluster.my_type()) {
            (Role::Inactive, _) => {}
            (_, None) => {
                if committed {
                    slog::info!(self.logger, "Removed from the cluster");
                    self.become_inactive();
                }
            }
            (Role::Leader, Some(member_type)) => {
                if committed {
                    match member_type {
                        MemberType::Active => {}
                        MemberType::Passive | MemberType::Reserve => self.become_passive(),
                        MemberType::Learner => self.become_learner(),
                    }
                }
            }
            (Role::Passive, Some(MemberType::Active)) | (Role::Learner, Some(MemberType::Active)) => {
                let leader = self.leader.clone();
                self.become_follower(leader);
            }
            (Role::Follower, Some(MemberType::Passive))
            | (Role::Follower, Some(MemberType::Reserve))
            | (Role::Candidate, Some(MemberType::Passive))
            | (Role::Candidate, Some(MemberType::Reserve))
            | (Role::Learner, Some(MemberType::Passive))
            | (Role::Learner, Some(MemberType::Reserve)) => self.become_passive(),
            (Role::Follower, Some(MemberType::Learner))
            | (Role::Candidate, Some(MemberType::Learner))
            | (Role::Passive, Some(MemberType::Learner)) => self.become_learner(),
            _ => {}
        }
    }

    pub(super) fn fail_on_error(&mut self, result: Result<(), FatalError>) {
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Internal fault. Local state can't be trusted anymore, so stop serving for good.
    pub(super) fn fail(&mut self, error: FatalError) {
        slog::error!(self.logger, "Fatal error, going inactive: {:?}", error);
        self.become_inactive();

        if !self.failed {
            self.failed = true;
            for listener in self.failure_listeners.iter_mut() {
                listener.on_failure(&error);
            }
        }
    }
}

fn check_bootstrap_members(persisted: &Configuration, given: &[RaftMember]) -> Result<(), StartupError> {
    let mut persisted_ids: Vec<MemberId> = persisted.members.iter().map(|m| m.id.clone()).collect();
    let mut given_ids: Vec<MemberId> = given.iter().map(|m| m.id.clone()).collect();
    persisted_ids.sort();
    given_ids.sort();

    if persisted_ids != given_ids {
        return Err(StartupError::ConfigurationMismatch {
            persisted: persisted_ids,
            given: given_ids,
        });
    }

    Ok(())
}
