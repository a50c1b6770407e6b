use crate::commitlog::Index;
use crate::replica::errors::{AppendError, FatalError};
use crate::replica::local_state::Term;
use crate::replica::peers::MemberId;
use crate::replica::election::Role;
use crate::replica::write_ahead_log::{ApplicationEntry, RaftLogEntry};

/// Receives every committed index exactly once, in order, without gaps. `entry` is `None` for
/// indexes that were covered by an installed snapshot.
pub trait CommitListener: Send {
    fn on_commit(&mut self, index: Index, entry: Option<&RaftLogEntry>);
}

/// The four completion points of a leader append. Each append gets exactly one of `on_write` or
/// `on_write_error`, and after `on_write` exactly one of `on_commit` or `on_commit_error`.
pub trait AppendListener: Send {
    fn on_write(&mut self, index: Index);
    fn on_write_error(&mut self, error: AppendError);
    fn on_commit(&mut self, index: Index);
    fn on_commit_error(&mut self, index: Index, error: AppendError);
}

pub trait FailureListener: Send {
    fn on_failure(&mut self, error: &FatalError);
}

/// Veto hook run by the leader before an application entry is written.
pub trait EntryValidator: Send {
    fn validate(&self, last_entry: Option<&ApplicationEntry>, candidate: &ApplicationEntry) -> Result<(), String>;
}

pub struct NoopEntryValidator;

impl EntryValidator for NoopEntryValidator {
    fn validate(&self, _: Option<&ApplicationEntry>, _: &ApplicationEntry) -> Result<(), String> {
        Ok(())
    }
}

pub trait SnapshotReplicationListener: Send {
    fn on_snapshot_replication_started(&mut self);

    /// Fires when the snapshot was committed, and when the transfer was aborted.
    fn on_snapshot_replication_completed(&mut self, term: Term);
}

/// Metrics go wherever the embedding application wants them. Every method is a no-op unless
/// overridden.
pub trait MetricsSink: Send + Sync {
    fn role_changed(&self, _member: &MemberId, _role: Role) {}
    fn term_changed(&self, _member: &MemberId, _term: Term) {}
    fn commit_index_changed(&self, _member: &MemberId, _commit_index: Index) {}
    fn append_sent(&self, _member: &MemberId, _to: &MemberId, _num_entries: usize) {}
    fn election_started(&self, _member: &MemberId, _term: Term) {}
    fn snapshot_replication_started(&self, _member: &MemberId, _to: &MemberId) {}
    fn snapshot_replication_completed(&self, _member: &MemberId, _to: &MemberId) {}
    fn stepped_down(&self, _member: &MemberId, _term: Term) {}
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
