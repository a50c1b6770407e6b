use crate::commitlog::Index;
use crate::snapshot::{ChunkId, SnapshotChunkReader, SnapshotMetadata};
use tokio::time::{Duration, Instant};

/// Leader's view of one replication target.
pub(crate) struct PeerState {
    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    pub(crate) next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    pub(crate) matched: Index,
    // Last snapshot and configuration the member told us about.
    pub(crate) snapshot_index: Index,
    pub(crate) config_index: Index,

    // SeqNo is a form of a logical clock that tracks a term leader's interactions with a peer. When
    // a replica becomes leader, it initializes last sent/received to 0. Each time leader sends a
    // request, it increments the last sent SeqNo and ensures the response will be associated with
    // that SeqNo. If a leader receives a SeqNo from earlier than a previously received SeqNo, it
    // discards it.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
    in_flight: Option<InFlight>,

    pub(crate) install: Option<InstallCursor>,

    pub(crate) failure_count: u32,
    pub(crate) last_response_at: Option<Instant>,
    // Send time of the latest request the member acknowledged. Confirms leadership for reads.
    pub(crate) last_ack_sent_at: Option<Instant>,

    // No longer in the configuration. Kept until it has learned that, so it can shut itself down.
    pub(crate) retiring: bool,
}

pub(crate) struct InFlight {
    pub(crate) seq_no: u64,
    pub(crate) sent_at: Instant,
    pub(crate) kind: InFlightKind,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum InFlightKind {
    Append {
        // Last index covered by the request. A success reply can't match beyond it.
        last_index: Index,
        commit_index: Index,
    },
    Install {
        snapshot_index: Index,
        next_chunk_id: Option<ChunkId>,
        complete: bool,
    },
    Configure {
        index: Index,
    },
    Transfer,
}

/// Where a snapshot transfer to a member stands. `next_chunk_id == None` means the next chunk sent
/// is the initial one.
pub(crate) struct InstallCursor {
    pub(crate) snapshot: SnapshotMetadata,
    pub(crate) reader: Box<dyn SnapshotChunkReader>,
    pub(crate) next_chunk_id: Option<ChunkId>,
}

impl PeerState {
    pub(crate) fn new(last_log_index: Index) -> Self {
        PeerState {
            next: last_log_index.plus(1),
            matched: Index::ZERO,
            snapshot_index: Index::ZERO,
            config_index: Index::ZERO,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
            in_flight: None,
            install: None,
            failure_count: 0,
            last_response_at: None,
            last_ack_sent_at: None,
            retiring: false,
        }
    }

    // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
    // peer; no pipelining. Entries are still batched.
    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    /// Records a request about to be sent and returns its SeqNo.
    pub(crate) fn start_request(&mut self, kind: InFlightKind, sent_at: Instant) -> u64 {
        self.last_sent_seq_no += 1;
        self.in_flight.replace(InFlight {
            seq_no: self.last_sent_seq_no,
            sent_at,
            kind,
        });
        self.last_sent_seq_no
    }

    /// Returns the request a reply belongs to, or `None` if the reply is stale.
    pub(crate) fn complete_request(&mut self, received_seq_no: u64) -> Option<InFlight> {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            return None;
        }

        match self.in_flight.take() {
            Some(in_flight) if in_flight.seq_no == received_seq_no => Some(in_flight),
            other => {
                self.in_flight = other;
                None
            }
        }
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    /// Gives up on an outstanding request that never got a reply. A late reply is then stale.
    /// Returns true if a request was expired.
    pub(crate) fn expire_request(&mut self, now: Instant, timeout: Duration) -> bool {
        let expired = match &self.in_flight {
            Some(in_flight) => now >= in_flight.sent_at + timeout,
            None => false,
        };
        if expired {
            self.last_received_seq_no = self.last_sent_seq_no;
            self.in_flight = None;
            self.record_failure();
        }
        expired
    }

    pub(crate) fn record_response(&mut self, now: Instant, sent_at: Instant) {
        self.failure_count = 0;
        self.last_response_at.replace(now);
        if self.last_ack_sent_at.map(|t| t < sent_at).unwrap_or(true) {
            self.last_ack_sent_at.replace(sent_at);
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
    }

    pub(crate) fn record_match(&mut self, last_log_index: Index) {
        self.matched = last_log_index;
        self.next = last_log_index.plus(1);
    }

    /// Member rejected an append. `hint` is the member's guess at where our logs may agree.
    pub(crate) fn record_mismatch(&mut self, hint: Index, leader_last_index: Index) {
        if hint < self.matched {
            self.matched = hint;
        }

        let next = std::cmp::min(hint.plus(1), leader_last_index.plus(1));
        self.next = std::cmp::max(next, Index::start_index());
    }

    pub(crate) fn reset_install(&mut self) {
        self.install = None;
    }

    pub(crate) fn is_healthy(&self, now: Instant, response_window: Duration, max_failures: u32) -> bool {
        let responded_recently = match self.last_response_at {
            Some(at) => now.saturating_duration_since(at) <= response_window,
            None => false,
        };
        responded_recently && self.failure_count < max_failures
    }
}
