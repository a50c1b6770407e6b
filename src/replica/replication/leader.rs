use crate::commitlog::{Index, Log};
use crate::replica::callback::Callback;
use crate::replica::configuration::Configuration;
use crate::replica::election::{Role, RoleState};
use crate::replica::errors::FatalError;
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::messages::{
    AppendRequest, ConfigureRequest, ErrorKind, InstallRequest, RaftRequest, RaftResponse, ResponseStatus,
    TransferRequest, TransferResponse,
};
use crate::replica::peers::MemberId;
use crate::replica::replica::Replica;
use crate::replica::replication::peer_state::InFlight;
use crate::replica::replication::{
    get_cluster_commit_index, InFlightKind, InstallCursor, LeaderState, PeerState, PendingTransfer,
};
use crate::replica::timers::{TimerEvent, TimerKind};
use crate::replica::transport::{OutboundRequest, ReplyFromPeer, RequestDescriptor};
use crate::replica::write_ahead_log::{ApplicationEntry, EntryPayload, RaftLogEntry, WriteAheadLog};
use crate::snapshot::{SnapshotMetadata, SnapshotStore};
use std::{cmp, io};
use tokio::time::Instant;

// After this many consecutive failures a member only gets empty appends until it answers again.
const PING_AFTER_FAILURES: u32 = 5;

enum ReplyOutcome {
    HigherTerm(Term),
    Failed,
    Acked(Ack),
}

struct Ack {
    sent_at: Instant,
    matched_advanced: bool,
    install_completed: bool,
    retire: bool,
    resend: bool,
}

impl Ack {
    fn new(sent_at: Instant) -> Self {
        Ack {
            sent_at,
            matched_advanced: false,
            install_completed: false,
            retire: false,
            resend: false,
        }
    }
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    /// > Upon election: send initial empty AppendEntries RPCs
    /// > (heartbeat) to each server; repeat during idle periods to
    /// > prevent election timeouts (§5.2)
    pub(crate) fn become_leader(&mut self) -> Result<(), FatalError> {
        let term = self.local_state.current_term();
        slog::info!(self.logger, "Won election for term {:?}", term);

        let last_application_entry = self.find_last_application_entry()?;
        self.leader = Some(self.my_member_id.clone());
        let epoch = self.next_epoch();
        let heartbeat_timer = self.scheduler.schedule(
            self.options.heartbeat_interval,
            TimerEvent {
                epoch,
                kind: TimerKind::Heartbeat,
            },
        );
        let leader_state = LeaderState::new(
            &self.cluster.replication_targets(),
            self.log.last_index(),
            heartbeat_timer,
            self.scheduler.now(),
            last_application_entry,
        );
        self.set_role(RoleState::Leader(Box::new(leader_state)));

        // Committing an entry from our own term is the only way to learn what's committed.
        let initial_entry_index = self
            .log
            .append(RaftLogEntry::new(term, EntryPayload::Initialize))
            .map_err(FatalError::LogIo)?;
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.initial_entry_index = initial_entry_index;
        }

        // Leave force mode through the log, same members.
        let forced = self.cluster.effective().filter(|c| c.force).map(|c| c.members.clone());
        if let Some(members) = forced {
            let index = self.log.next_index();
            let configuration = Configuration::new(index, term, members);
            slog::info!(self.logger, "Replacing forced configuration at {:?}", index);
            self.log.append_at(
                index,
                RaftLogEntry::new(term, EntryPayload::Configuration(configuration.clone())),
            )?;
            self.cluster.append(configuration);
        }

        self.replicate_to_all()?;
        self.try_commit()
    }

    fn find_last_application_entry(&self) -> Result<Option<ApplicationEntry>, FatalError> {
        let first_index = self.log.first_index();
        let mut index = self.log.last_index();
        while !index.is_zero() && index >= first_index {
            let entry = self.log.read(index).map_err(FatalError::LogIo)?;
            if let Some(application) = entry.as_ref().and_then(|e| e.application()) {
                return Ok(Some(application.clone()));
            }
            index = index.minus(1);
        }

        Ok(None)
    }

    pub(crate) fn effective_voters(&self) -> Vec<MemberId> {
        self.cluster
            .effective()
            .map(|c| c.voters().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn replicate_to_all(&mut self) -> Result<(), FatalError> {
        let peer_ids: Vec<MemberId> = match self.role.leader_state() {
            Some(leader_state) => leader_state.tracker.keys().cloned().collect(),
            None => return Ok(()),
        };

        for peer_id in peer_ids.iter() {
            self.replicate_to(peer_id)?;
        }

        Ok(())
    }

    /// Send the member whatever it needs next, unless it still owes us a reply.
    pub(crate) fn replicate_to(&mut self, peer_id: &MemberId) -> Result<(), FatalError> {
        let term = self.local_state.current_term();
        let now = self.scheduler.now();
        let commit_index = self.log.commit_index();
        let snapshot = self.snapshot_store.current_snapshot();
        let effective = self.cluster.effective().cloned();

        let peer = match self.role.leader_state_mut().and_then(|ls| ls.tracker.get_mut(peer_id)) {
            Some(peer) => peer,
            None => return Ok(()),
        };
        if peer.has_outstanding_request() {
            return Ok(());
        }
        let logger = self.logger.new(slog::o!("Peer" => peer_id.to_string()));

        let send_snapshot = match snapshot.as_ref() {
            Some(snapshot) => should_send_snapshot(
                peer,
                &self.log,
                snapshot,
                self.options.prefer_snapshot_replication_threshold,
            )
            .map_err(FatalError::LogIo)?,
            None => {
                peer.reset_install();
                false
            }
        };

        let (request, kind) = if peer.failure_count >= PING_AFTER_FAILURES {
            append_request(&self.log, term, &self.my_member_id, peer.next, 0, commit_index).map_err(FatalError::LogIo)?
        } else if let Some(configuration) = effective.filter(|c| peer.config_index < c.index) {
            let index = configuration.index;
            let request = RaftRequest::Configure(ConfigureRequest {
                term,
                leader: self.my_member_id.clone(),
                index,
                configuration_term: configuration.term,
                timestamp: configuration.timestamp,
                members: configuration.members,
            });
            (request, InFlightKind::Configure { index })
        } else if let (true, Some(snapshot)) = (send_snapshot, snapshot) {
            match next_install_chunk(&logger, peer, snapshot, &*self.snapshot_store, term, &self.my_member_id) {
                Some((request, kind, initial)) => {
                    if initial {
                        slog::info!(logger, "Replicating snapshot");
                        self.metrics.snapshot_replication_started(&self.my_member_id, peer_id);
                    }
                    (request, kind)
                }
                None => return Ok(()),
            }
        } else {
            let (request, kind) = append_request(
                &self.log,
                term,
                &self.my_member_id,
                peer.next,
                self.options.max_append_batch_size,
                commit_index,
            )
            .map_err(FatalError::LogIo)?;
            if let RaftRequest::Append(append) = &request {
                self.metrics
                    .append_sent(&self.my_member_id, peer_id, append.entries.len());
            }
            (request, kind)
        };

        let seq_no = peer.start_request(kind, now);
        self.transport.send(OutboundRequest {
            descriptor: RequestDescriptor {
                peer_id: peer_id.clone(),
                term,
                seq_no,
            },
            request,
        });

        Ok(())
    }

    pub(crate) fn handle_replication_reply(&mut self, reply: ReplyFromPeer) -> Result<(), FatalError> {
        let ReplyFromPeer { descriptor, result } = reply;
        let peer_id = descriptor.peer_id;
        let term = self.local_state.current_term();
        let now = self.scheduler.now();
        let last_index = self.log.last_index();
        let committed_config_index = self.cluster.committed_index();
        // Members dropped from the committed configuration can stop hearing from us once they
        // know about it.
        let removed = !self
            .cluster
            .committed()
            .and_then(|c| c.member(&peer_id))
            .map(|m| m.member_type.is_replication_target())
            .unwrap_or(false);
        let logger = self
            .logger
            .new(slog::o!("Peer" => peer_id.to_string(), "SeqNo" => descriptor.seq_no));

        let outcome = {
            let leader_state = match self.role.leader_state_mut() {
                Some(leader_state) => leader_state,
                None => return Ok(()),
            };
            let peer = match leader_state.tracker.get_mut(&peer_id) {
                Some(peer) => peer,
                None => return Ok(()),
            };
            let in_flight = match peer.complete_request(descriptor.seq_no) {
                Some(in_flight) => in_flight,
                None => {
                    slog::debug!(logger, "Dropping stale reply");
                    return Ok(());
                }
            };

            match result {
                Err(e) => {
                    slog::debug!(logger, "Request failed: {}", e);
                    if let InFlightKind::Install { .. } = in_flight.kind {
                        if !e.is_timeout() {
                            peer.reset_install();
                        }
                    }
                    peer.record_failure();
                    ReplyOutcome::Failed
                }
                Ok(response) => {
                    let mut outcome = on_response(&logger, peer, in_flight, response, now, last_index, term);
                    if let ReplyOutcome::Acked(ack) = &mut outcome {
                        ack.retire = peer.retiring && removed && peer.matched >= committed_config_index;
                    }
                    outcome
                }
            }
        };

        match outcome {
            ReplyOutcome::HigherTerm(higher_term) => {
                slog::info!(logger, "Member is at term {:?}", higher_term);
                self.observe_term(higher_term)?;
            }
            ReplyOutcome::Failed => self.check_step_down(&peer_id, now),
            ReplyOutcome::Acked(Ack {
                sent_at,
                matched_advanced,
                install_completed,
                retire,
                resend,
            }) => {
                if install_completed {
                    slog::info!(logger, "Snapshot replicated");
                    self.metrics
                        .snapshot_replication_completed(&self.my_member_id, &peer_id);
                }

                if retire {
                    slog::info!(logger, "Removed member caught up with its removal, no longer replicating to it");
                    if let Some(leader_state) = self.role.leader_state_mut() {
                        leader_state.tracker.remove(&peer_id);
                    }
                    return Ok(());
                }

                self.complete_reads();
                if matched_advanced {
                    self.try_commit()?;
                }
                self.check_transfer();

                let read_waiting = match self.role.leader_state() {
                    Some(leader_state) => leader_state.pending_reads.iter().any(|r| r.registered_at > sent_at),
                    None => return Ok(()),
                };
                if resend || read_waiting {
                    self.replicate_to(&peer_id)?;
                }
            }
        }

        Ok(())
    }

    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    pub(crate) fn try_commit(&mut self) -> Result<(), FatalError> {
        let voters = self.effective_voters();
        let matched_indexes: Vec<Index> = match self.role.leader_state() {
            Some(leader_state) => voters
                .iter()
                .map(|id| {
                    if id == &self.my_member_id {
                        self.log.last_index()
                    } else {
                        leader_state.tracker.get(id).map(|p| p.matched).unwrap_or(Index::ZERO)
                    }
                })
                .collect(),
            None => return Ok(()),
        };
        if matched_indexes.is_empty() {
            return Ok(());
        }

        let tentative_commit_index = get_cluster_commit_index(matched_indexes);
        let advanced = self
            .log
            .ratchet_fwd_commit_index_if_valid(tentative_commit_index, self.local_state.current_term())
            .map_err(FatalError::LogIo)?;
        if advanced {
            slog::debug!(self.logger, "Commit index is now {:?}", self.log.commit_index());
            self.apply_commits()?;
            // Let followers know right away.
            self.replicate_to_all()?;
        }

        Ok(())
    }

    pub(crate) fn handle_heartbeat_tick(&mut self) -> Result<(), FatalError> {
        let now = self.scheduler.now();
        let heartbeat_timer = self.scheduler.schedule(
            self.options.heartbeat_interval,
            TimerEvent {
                epoch: self.epoch,
                kind: TimerKind::Heartbeat,
            },
        );
        let request_timeout = self.options.peer_request_timeout * 2;
        let max_failures = self.options.min_step_down_failure_count;

        let mut failed_peers = Vec::new();
        {
            let leader_state = match self.role.leader_state_mut() {
                Some(leader_state) => leader_state,
                None => return Ok(()),
            };
            leader_state.heartbeat_timer = heartbeat_timer;

            for (peer_id, peer) in leader_state.tracker.iter_mut() {
                if peer.expire_request(now, request_timeout) {
                    failed_peers.push(peer_id.clone());
                }
            }
            leader_state.expire_reads(now);

            let unreachable_retirees: Vec<MemberId> = leader_state
                .tracker
                .iter()
                .filter(|(_, peer)| peer.retiring && peer.failure_count >= max_failures)
                .map(|(peer_id, _)| peer_id.clone())
                .collect();
            for peer_id in unreachable_retirees {
                slog::info!(self.logger, "Giving up on removed member {}", peer_id);
                leader_state.tracker.remove(&peer_id);
            }
        }

        self.check_transfer();
        for peer_id in failed_peers.iter() {
            self.check_step_down(peer_id, now);
        }

        self.replicate_to_all()
    }

    /// Leader that can't reach a quorum for too long assumes it's partitioned away.
    fn check_step_down(&mut self, peer_id: &MemberId, now: Instant) {
        let voters = self.effective_voters();
        let leader_state = match self.role.leader_state() {
            Some(leader_state) => leader_state,
            None => return,
        };

        let failures = leader_state.tracker.get(peer_id).map(|p| p.failure_count).unwrap_or(0);
        if failures < self.options.min_step_down_failure_count {
            return;
        }

        let last_quorum_response = leader_state
            .quorum_response_instant(&voters, &self.my_member_id, now)
            .map(|at| cmp::max(at, leader_state.started_at))
            .unwrap_or(leader_state.started_at);
        let silence = now.saturating_duration_since(last_quorum_response);
        if silence <= self.options.max_quorum_response_timeout {
            return;
        }

        let term = self.local_state.current_term();
        slog::warn!(
            self.logger,
            "No response from a quorum for {:?}, stepping down from term {:?}",
            silence,
            term
        );
        self.metrics.stepped_down(&self.my_member_id, term);
        self.become_follower(None);
    }

    pub(crate) fn handle_transfer(
        &mut self,
        request: TransferRequest,
        callback: Callback<RaftResponse>,
    ) -> Result<(), FatalError> {
        let respond = |status: ResponseStatus| RaftResponse::Transfer(TransferResponse { status });

        if request.member == self.my_member_id {
            match self.role.role() {
                Role::Leader => callback.send(respond(ResponseStatus::Ok)),
                Role::Follower => {
                    slog::info!(self.logger, "Leadership handed over to us, starting election");
                    callback.send(respond(ResponseStatus::Ok));
                    self.start_election()?;
                }
                _ => callback.send(respond(ResponseStatus::error(ErrorKind::IllegalMemberState))),
            }
            return Ok(());
        }

        let deadline = self.scheduler.now() + self.options.election_timeout_max;
        let is_voter = self.cluster.is_voter(&request.member);
        let leader_hint = self.leader.clone();
        let leader_state = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => {
                callback.send(respond(ResponseStatus::no_leader(leader_hint)));
                return Ok(());
            }
        };

        if !is_voter {
            callback.send(respond(ResponseStatus::error_with_message(
                ErrorKind::IllegalMemberState,
                "Leadership can only go to an active member",
            )));
            return Ok(());
        }
        if leader_state.transfer.is_some() {
            callback.send(respond(ResponseStatus::error(ErrorKind::TransferInProgress)));
            return Ok(());
        }

        slog::info!(self.logger, "Transferring leadership to {}", request.member);
        leader_state.transfer = Some(PendingTransfer {
            target: request.member.clone(),
            deadline,
            callback,
        });

        self.check_transfer();
        self.replicate_to(&request.member)
    }

    /// Hand over leadership once the target has everything we have, or give up at the deadline.
    pub(crate) fn check_transfer(&mut self) {
        let now = self.scheduler.now();
        let term = self.local_state.current_term();
        let last_index = self.log.last_index();

        let leader_state = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => return,
        };
        let (target, deadline) = match &leader_state.transfer {
            Some(transfer) => (transfer.target.clone(), transfer.deadline),
            None => return,
        };

        if now >= deadline {
            if let Some(transfer) = leader_state.transfer.take() {
                slog::warn!(self.logger, "Leadership transfer to {} timed out", target);
                transfer.callback.send(RaftResponse::Transfer(TransferResponse {
                    status: ResponseStatus::error_with_message(
                        ErrorKind::Unavailable,
                        "Transfer target didn't catch up in time",
                    ),
                }));
            }
            return;
        }

        let peer = match leader_state.tracker.get_mut(&target) {
            Some(peer) => peer,
            None => return,
        };
        if peer.matched < last_index || peer.has_outstanding_request() {
            return;
        }

        let seq_no = peer.start_request(InFlightKind::Transfer, now);
        let transfer = match leader_state.transfer.take() {
            Some(transfer) => transfer,
            None => return,
        };
        self.transport.send(OutboundRequest {
            descriptor: RequestDescriptor {
                peer_id: target.clone(),
                term,
                seq_no,
            },
            request: RaftRequest::Transfer(TransferRequest { member: target.clone() }),
        });

        slog::info!(self.logger, "{} caught up, handing over leadership", target);
        transfer.callback.send(RaftResponse::Transfer(TransferResponse {
            status: ResponseStatus::Ok,
        }));
        self.become_follower(None);
    }
}

fn on_response(
    logger: &slog::Logger,
    peer: &mut PeerState,
    in_flight: InFlight,
    response: RaftResponse,
    now: Instant,
    leader_last_index: Index,
    current_term: Term,
) -> ReplyOutcome {
    let InFlight { sent_at, kind, .. } = in_flight;

    match (kind, response) {
        (InFlightKind::Append { last_index, .. }, RaftResponse::Append(response)) => {
            if response.term > current_term {
                return ReplyOutcome::HigherTerm(response.term);
            }
            if !response.status.is_ok() {
                slog::debug!(logger, "Append rejected: {:?}", response.status);
                peer.record_failure();
                return ReplyOutcome::Failed;
            }

            peer.record_response(now, sent_at);
            peer.snapshot_index = response.last_snapshot_index;
            peer.config_index = response.configuration_index;

            if response.succeeded {
                // The member's log may run past what we sent; only what we sent is known to match.
                let matched = cmp::min(response.last_log_index, last_index);
                let matched_advanced = matched > peer.matched;
                if matched >= peer.matched {
                    peer.record_match(matched);
                }
                ReplyOutcome::Acked(Ack {
                    matched_advanced,
                    resend: matched_advanced && peer.next <= leader_last_index,
                    ..Ack::new(sent_at)
                })
            } else {
                let next_before = peer.next;
                peer.record_mismatch(response.last_log_index, leader_last_index);
                slog::debug!(logger, "Log mismatch, next index {:?} -> {:?}", next_before, peer.next);
                ReplyOutcome::Acked(Ack {
                    resend: peer.next != next_before,
                    ..Ack::new(sent_at)
                })
            }
        }
        (
            InFlightKind::Install {
                snapshot_index,
                next_chunk_id,
                complete,
            },
            RaftResponse::Install(response),
        ) => {
            if response.term > current_term {
                return ReplyOutcome::HigherTerm(response.term);
            }
            if !response.status.is_ok() {
                slog::warn!(logger, "Snapshot chunk rejected, restarting transfer: {:?}", response.status);
                peer.reset_install();
                peer.record_failure();
                return ReplyOutcome::Failed;
            }

            peer.record_response(now, sent_at);
            if complete {
                peer.reset_install();
                peer.snapshot_index = cmp::max(peer.snapshot_index, snapshot_index);
                let matched_advanced = snapshot_index > peer.matched;
                if matched_advanced {
                    peer.matched = snapshot_index;
                }
                peer.next = snapshot_index.plus(1);
                ReplyOutcome::Acked(Ack {
                    matched_advanced,
                    install_completed: true,
                    resend: true,
                    ..Ack::new(sent_at)
                })
            } else {
                if let Some(cursor) = peer.install.as_mut() {
                    if cursor.snapshot.index == snapshot_index {
                        cursor.next_chunk_id = next_chunk_id;
                    }
                }
                ReplyOutcome::Acked(Ack {
                    resend: true,
                    ..Ack::new(sent_at)
                })
            }
        }
        (InFlightKind::Configure { index }, RaftResponse::Configure(response)) => {
            if !response.status.is_ok() && response.term > current_term {
                return ReplyOutcome::HigherTerm(response.term);
            }
            if !response.status.is_ok() {
                slog::debug!(logger, "Configure rejected: {:?}", response.status);
                peer.record_failure();
                return ReplyOutcome::Failed;
            }

            peer.record_response(now, sent_at);
            peer.config_index = cmp::max(index, response.index);
            ReplyOutcome::Acked(Ack {
                resend: true,
                ..Ack::new(sent_at)
            })
        }
        (InFlightKind::Transfer, _) => ReplyOutcome::Acked(Ack::new(sent_at)),
        (kind, response) => {
            slog::warn!(logger, "Mismatched reply {:?} for {:?}", response, kind);
            peer.record_failure();
            ReplyOutcome::Failed
        }
    }
}

/// Snapshot instead of entries when the entries are gone, or when the member is so far behind
/// that the snapshot is cheaper.
fn should_send_snapshot<L>(
    peer: &PeerState,
    log: &WriteAheadLog<L>,
    snapshot: &SnapshotMetadata,
    threshold: u64,
) -> io::Result<bool>
where
    L: Log<RaftLogEntry>,
{
    if peer.install.is_some() {
        return Ok(true);
    }
    if peer.snapshot_index >= snapshot.index {
        return Ok(false);
    }

    let previous = peer.next.minus(1);
    let compacted = log.first_index() > peer.next || log.term_at(previous)?.is_none();
    let far_behind = snapshot.index.distance_from(previous) > threshold;

    Ok(compacted || far_behind)
}

fn append_request<L>(
    log: &WriteAheadLog<L>,
    term: Term,
    leader: &MemberId,
    next: Index,
    max_entries: usize,
    commit_index: Index,
) -> io::Result<(RaftRequest, InFlightKind)>
where
    L: Log<RaftLogEntry>,
{
    let (prev_log_index, prev_log_term) = match log.term_at(next.minus(1))? {
        Some(prev_log_term) => (next.minus(1), prev_log_term),
        None => log.snapshot(),
    };

    let mut entries = Vec::new();
    let mut index = prev_log_index.plus(1);
    while entries.len() < max_entries && index <= log.last_index() {
        match log.read(index)? {
            Some(entry) => entries.push(entry),
            None => break,
        }
        index = index.plus(1);
    }

    let last_index = prev_log_index.plus(entries.len() as u64);
    let request = RaftRequest::Append(AppendRequest {
        term,
        leader: leader.clone(),
        prev_log_index,
        prev_log_term,
        entries,
        commit_index,
    });

    Ok((request, InFlightKind::Append { last_index, commit_index }))
}

/// Next chunk of the snapshot transfer to `peer`. Starts over with a fresh reader when the
/// snapshot changed under us. Returns the request, its in-flight kind and whether it's the
/// initial chunk.
fn next_install_chunk(
    logger: &slog::Logger,
    peer: &mut PeerState,
    snapshot: SnapshotMetadata,
    store: &dyn SnapshotStore,
    term: Term,
    leader: &MemberId,
) -> Option<(RaftRequest, InFlightKind, bool)> {
    let outdated = peer
        .install
        .as_ref()
        .map(|cursor| cursor.snapshot.id != snapshot.id)
        .unwrap_or(true);
    if outdated {
        match store.new_chunk_reader(&snapshot) {
            Ok(reader) => {
                peer.install = Some(InstallCursor {
                    snapshot,
                    reader,
                    next_chunk_id: None,
                })
            }
            Err(e) => {
                slog::warn!(logger, "Can't read snapshot {}: {}", snapshot.id, e);
                peer.reset_install();
                return None;
            }
        }
    }

    let cursor = peer.install.as_mut()?;
    let initial = cursor.next_chunk_id.is_none();
    let positioned = match &cursor.next_chunk_id {
        None => {
            cursor.reader.reset();
            Ok(())
        }
        Some(chunk_id) => cursor.reader.seek(chunk_id),
    };
    let chunk = match positioned {
        Ok(()) => cursor.reader.next(),
        Err(e) => {
            slog::warn!(logger, "Failed to seek snapshot: {}", e);
            None
        }
    };
    let chunk = match chunk {
        Some(chunk) => chunk,
        None => {
            slog::warn!(logger, "Snapshot chunk unavailable, restarting transfer");
            peer.reset_install();
            return None;
        }
    };

    let next_chunk_id = cursor.reader.peek_next_id();
    let complete = next_chunk_id.is_none();
    let request = RaftRequest::Install(InstallRequest {
        current_term: term,
        leader: leader.clone(),
        index: cursor.snapshot.index,
        term: cursor.snapshot.term,
        timestamp: cursor.snapshot.timestamp,
        snapshot_id: chunk.snapshot_id,
        chunk_id: chunk.chunk_id,
        next_chunk_id: next_chunk_id.clone(),
        total_count: chunk.total_count,
        checksum: chunk.checksum,
        data: chunk.data,
        initial,
        complete,
    });
    let kind = InFlightKind::Install {
        snapshot_index: cursor.snapshot.index,
        next_chunk_id,
        complete,
    };

    Some((request, kind, initial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::messages::ConfigurationResponse;
    use crate::replica::peers::RaftMember;

    fn configure_reply(peer: &mut PeerState, response: ConfigurationResponse, current_term: Term) -> ReplyOutcome {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let now = Instant::now();
        let seq_no = peer.start_request(InFlightKind::Configure { index: Index::new(3) }, now);
        let in_flight = peer.complete_request(seq_no).unwrap();

        on_response(
            &logger,
            peer,
            in_flight,
            RaftResponse::Configure(response),
            now,
            Index::new(3),
            current_term,
        )
    }

    #[test]
    fn configure_refused_at_a_newer_term_deposes_the_leader() {
        let mut peer = PeerState::new(Index::new(3));
        let response =
            ConfigurationResponse::rejected_at_term(ResponseStatus::error(ErrorKind::IllegalMemberState), Term::new(3));

        match configure_reply(&mut peer, response, Term::new(2)) {
            ReplyOutcome::HigherTerm(term) => assert_eq!(term, Term::new(3)),
            _ => panic!("Expected the member's newer term"),
        }
    }

    #[test]
    fn configure_refused_at_our_term_counts_as_failure() {
        let mut peer = PeerState::new(Index::new(3));
        let response =
            ConfigurationResponse::rejected_at_term(ResponseStatus::error(ErrorKind::IllegalMemberState), Term::new(2));

        assert!(matches!(configure_reply(&mut peer, response, Term::new(2)), ReplyOutcome::Failed));
        assert_eq!(peer.failure_count, 1);
    }

    #[test]
    fn configure_ack_records_the_members_configuration() {
        let mut peer = PeerState::new(Index::new(3));
        let configuration = Configuration::new(Index::new(3), Term::new(2), vec![RaftMember::active("a")]);

        match configure_reply(&mut peer, ConfigurationResponse::ok(&configuration), Term::new(2)) {
            ReplyOutcome::Acked(ack) => assert!(ack.resend),
            _ => panic!("Expected an ack"),
        }
        assert_eq!(peer.config_index, Index::new(3));
        assert_eq!(peer.failure_count, 0);
    }
}
