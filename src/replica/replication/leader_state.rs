use crate::commitlog::Index;
use crate::replica::callback::Callback;
use crate::replica::configuration::Configuration;
use crate::replica::errors::{AppendError, ReadError};
use crate::replica::listeners::AppendListener;
use crate::replica::messages::{ConfigurationResponse, RaftResponse, ResponseStatus, TransferResponse};
use crate::replica::peers::MemberId;
use crate::replica::replication::PeerState;
use crate::replica::timers::TimerHandle;
use crate::replica::write_ahead_log::ApplicationEntry;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// Everything a leader owns for the duration of its term. Dropped (after failing whatever is still
/// pending) when it leaves office.
pub(crate) struct LeaderState {
    pub(crate) tracker: HashMap<MemberId, PeerState>,
    pub(crate) heartbeat_timer: TimerHandle,
    pub(crate) started_at: Instant,

    // Index of this term's Initialize entry. Until it commits, the leader doesn't know the real
    // commit index of the cluster.
    pub(crate) initial_entry_index: Index,

    pub(crate) pending_appends: BTreeMap<Index, Box<dyn AppendListener>>,
    pub(crate) pending_reads: Vec<PendingRead>,
    pub(crate) configuring: Option<PendingConfiguration>,
    pub(crate) transfer: Option<PendingTransfer>,

    // Handed to the entry validator with each new application entry.
    pub(crate) last_application_entry: Option<ApplicationEntry>,
}

pub(crate) struct PendingRead {
    pub(crate) registered_at: Instant,
    pub(crate) deadline: Instant,
    pub(crate) callback: Callback<Result<Index, ReadError>>,
}

pub(crate) struct PendingConfiguration {
    pub(crate) configuration: Configuration,
    pub(crate) kind: ConfigurationChange,
    pub(crate) callback: Callback<RaftResponse>,
}

pub(crate) struct PendingTransfer {
    pub(crate) target: MemberId,
    pub(crate) deadline: Instant,
    pub(crate) callback: Callback<RaftResponse>,
}

/// Which client request a configuration change came from. Decides the shape of the reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConfigurationChange {
    Join,
    Leave,
    Reconfigure,
}

impl ConfigurationChange {
    pub(crate) fn response(self, response: ConfigurationResponse) -> RaftResponse {
        match self {
            ConfigurationChange::Join => RaftResponse::Join(response),
            ConfigurationChange::Leave => RaftResponse::Leave(response),
            ConfigurationChange::Reconfigure => RaftResponse::Reconfigure(response),
        }
    }
}

impl LeaderState {
    pub(crate) fn new(
        peers: &[MemberId],
        last_log_index: Index,
        heartbeat_timer: TimerHandle,
        now: Instant,
        last_application_entry: Option<ApplicationEntry>,
    ) -> Self {
        let tracker = peers
            .iter()
            .map(|peer_id| (peer_id.clone(), PeerState::new(last_log_index)))
            .collect();

        LeaderState {
            tracker,
            heartbeat_timer,
            started_at: now,
            initial_entry_index: last_log_index.plus(1),
            pending_appends: BTreeMap::new(),
            pending_reads: Vec::new(),
            configuring: None,
            transfer: None,
            last_application_entry,
        }
    }

    pub(crate) fn is_initializing(&self, commit_index: Index) -> bool {
        commit_index < self.initial_entry_index
    }

    /// Track every replication target of the effective configuration. Members that dropped out
    /// are kept as retiring until they've heard about it.
    pub(crate) fn sync_peers(&mut self, targets: &[MemberId], last_log_index: Index) {
        for target in targets {
            self.tracker
                .entry(target.clone())
                .or_insert_with(|| PeerState::new(last_log_index))
                .retiring = false;
        }

        for (peer_id, peer) in self.tracker.iter_mut() {
            if !targets.contains(peer_id) {
                peer.retiring = true;
            }
        }
    }

    /// Resolves appends and the configuration change that are now committed.
    pub(crate) fn resolve_commits(&mut self, commit_index: Index) {
        let still_pending = self.pending_appends.split_off(&commit_index.plus(1));
        let committed = std::mem::replace(&mut self.pending_appends, still_pending);
        for (index, mut listener) in committed {
            listener.on_commit(index);
        }

        let is_committed = self
            .configuring
            .as_ref()
            .map(|c| c.configuration.index <= commit_index)
            .unwrap_or(false);
        if is_committed {
            if let Some(pending) = self.configuring.take() {
                let response = ConfigurationResponse::ok(&pending.configuration);
                pending.callback.send(pending.kind.response(response));
            }
        }
    }

    /// Leadership is over. Nothing pending will be resolved by this leader.
    pub(crate) fn fail_pending(&mut self, leader_hint: Option<MemberId>) {
        for (index, mut listener) in std::mem::take(&mut self.pending_appends) {
            listener.on_commit_error(index, AppendError::LeadershipLost);
        }

        for read in self.pending_reads.drain(..) {
            read.callback.send(Err(ReadError::LeadershipLost));
        }

        if let Some(pending) = self.configuring.take() {
            let status = ResponseStatus::no_leader(leader_hint.clone());
            pending
                .callback
                .send(pending.kind.response(ConfigurationResponse::error(status)));
        }

        if let Some(transfer) = self.transfer.take() {
            transfer.callback.send(RaftResponse::Transfer(TransferResponse {
                status: ResponseStatus::no_leader(leader_hint),
            }));
        }
    }

    pub(crate) fn expire_reads(&mut self, now: Instant) {
        let (expired, pending): (Vec<_>, Vec<_>) = self.pending_reads.drain(..).partition(|r| r.deadline <= now);
        self.pending_reads = pending;
        for read in expired {
            read.callback.send(Err(ReadError::QuorumUnreachable));
        }
    }

    /// Completes reads registered at or before `confirmed_at`, the send time of the latest
    /// request a quorum has acknowledged.
    pub(crate) fn complete_reads(&mut self, confirmed_at: Instant, commit_index: Index) {
        let (confirmed, pending): (Vec<_>, Vec<_>) = self
            .pending_reads
            .drain(..)
            .partition(|r| r.registered_at <= confirmed_at);
        self.pending_reads = pending;
        for read in confirmed {
            read.callback.send(Ok(commit_index));
        }
    }

    /// Latest send time of a request acknowledged by a quorum of `voters`.
    pub(crate) fn quorum_ack_instant(&self, voters: &[MemberId], me: &MemberId, now: Instant) -> Option<Instant> {
        self.quorum_instant(voters, me, now, |peer| peer.last_ack_sent_at)
    }

    /// Latest time by which a quorum of `voters` had responded.
    pub(crate) fn quorum_response_instant(&self, voters: &[MemberId], me: &MemberId, now: Instant) -> Option<Instant> {
        self.quorum_instant(voters, me, now, |peer| peer.last_response_at)
    }

    fn quorum_instant<F>(&self, voters: &[MemberId], me: &MemberId, now: Instant, instant_of: F) -> Option<Instant>
    where
        F: Fn(&PeerState) -> Option<Instant>,
    {
        if voters.is_empty() {
            return None;
        }

        let mut instants: Vec<Option<Instant>> = voters
            .iter()
            .map(|id| {
                if id == me {
                    Some(now)
                } else {
                    self.tracker.get(id).and_then(|peer| instant_of(peer))
                }
            })
            .collect();
        // Latest first, never-heard-from last.
        instants.sort_by(|a, b| b.cmp(a));

        instants[Configuration::quorum_of(voters.len()) - 1]
    }
}

/// `matched_indexes` holds the match index of every voter, the leader's own being its last log
/// index. Returns the highest index stored on a quorum of them.
pub(crate) fn get_cluster_commit_index(mut matched_indexes: Vec<Index>) -> Index {
    if matched_indexes.is_empty() {
        return Index::ZERO;
    }

    matched_indexes.sort();

    // Ascending, so the quorum-th highest value is `quorum` positions from the right.
    let quorum = Configuration::quorum_of(matched_indexes.len());
    matched_indexes[matched_indexes.len() - quorum]
}
