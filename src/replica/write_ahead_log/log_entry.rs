use crate::commitlog;
use crate::replica::configuration::Configuration;
use crate::replica::local_state::Term;
use bytes::Bytes;

/// An immutable entry of the replicated log. The index is implied by its position.
///
/// Not needed:
///
/// * Checksum is not needed, it's guaranteed by underlying commitlog.
/// * Index is not needed, the leader and follower both derive it from the previous entry.
#[derive(Clone, Debug, PartialEq)]
pub struct RaftLogEntry {
    pub term: Term,
    pub payload: EntryPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntryPayload {
    /// No-op appended by every new leader. Committing it commits everything before it.
    Initialize,
    Configuration(Configuration),
    Application(ApplicationEntry),
    Administrative(AdministrativeEntry),
}

/// App specific data covering a contiguous range of positions in the application's stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationEntry {
    pub lowest_position: u64,
    pub highest_position: u64,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdministrativeEntry {
    OpenSession(Bytes),
    CloseSession(Bytes),
    KeepAlive(Bytes),
    Metadata(Bytes),
}

impl commitlog::Entry for RaftLogEntry {}

impl RaftLogEntry {
    pub fn new(term: Term, payload: EntryPayload) -> Self {
        RaftLogEntry { term, payload }
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        match &self.payload {
            EntryPayload::Configuration(c) => Some(c),
            _ => None,
        }
    }

    pub fn application(&self) -> Option<&ApplicationEntry> {
        match &self.payload {
            EntryPayload::Application(a) => Some(a),
            _ => None,
        }
    }
}
