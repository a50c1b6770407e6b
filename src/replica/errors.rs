use crate::commitlog::Index;
use crate::replica::peers::MemberId;
use crate::snapshot::SnapshotError;
use std::io;

/// An internal fault. The replica can't know its durable state is sane anymore, so it goes
/// Inactive and tells its failure listeners.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Failed to persist local state")]
    LocalState(#[source] io::Error),

    #[error("Log IO failure")]
    LogIo(#[source] io::Error),

    #[error("Appended log entry to unexpected index. Expected {expected:?}, was {actual:?}")]
    LogInconsistent { expected: Index, actual: Index },

    #[error("Attempted to truncate committed entry {index:?}, commit index is {commit_index:?}")]
    TruncateCommitted { index: Index, commit_index: Index },

    #[error("Snapshot store failure")]
    Snapshot(#[source] SnapshotError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Persisted configuration {persisted:?} doesn't match the given members {given:?}")]
    ConfigurationMismatch {
        persisted: Vec<MemberId>,
        given: Vec<MemberId>,
    },

    #[error("Failed to load local state")]
    LocalState(#[source] io::Error),

    #[error("Failed to open log")]
    Log(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    // Can be retried with exponential backoff with recommended initial delay of 200ms. Likely an
    // election is in progress.
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,

    #[error("I'm not leader, {0} is")]
    NotLeader(MemberId),

    #[error("Leadership transfer in progress")]
    TransferInProgress,

    #[error("Entry rejected by validator: {0}")]
    ValidationRejected(String),

    #[error("Lost leadership before the entry was committed")]
    LeadershipLost,

    #[error("Failed to persist log")]
    LocalIo(#[source] io::Error),

    #[error("Replica is inactive")]
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,

    #[error("I'm not leader, {0} is")]
    NotLeader(MemberId),

    #[error("Leader hasn't committed an entry in its term yet")]
    LeaderInitializing,

    #[error("Couldn't confirm leadership with a quorum in time")]
    QuorumUnreachable,

    #[error("Lost leadership before the read was confirmed")]
    LeadershipLost,

    #[error("Replica is inactive")]
    Inactive,
}

/// Failure calling a peer. Protocol-level rejections are regular responses, not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerCallError {
    #[error("Timed out calling peer")]
    Timeout,

    #[error("Peer unreachable: {0}")]
    Unreachable(String),
}

impl PeerCallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PeerCallError::Timeout)
    }
}
