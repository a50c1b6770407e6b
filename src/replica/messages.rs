use crate::commitlog::Index;
use crate::replica::configuration::Configuration;
use crate::replica::local_state::Term;
use crate::replica::peers::{MemberId, RaftMember};
use crate::replica::write_ahead_log::RaftLogEntry;
use crate::snapshot::{ChunkId, SnapshotId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Every request a replica serves, whether it comes from a peer or a client.
#[derive(Clone, Debug, PartialEq)]
pub enum RaftRequest {
    Vote(VoteRequest),
    Append(AppendRequest),
    Install(InstallRequest),
    Configure(ConfigureRequest),
    Join(JoinRequest),
    Leave(LeaveRequest),
    Reconfigure(ReconfigureRequest),
    Transfer(TransferRequest),
    ForceConfigure(ForceConfigureRequest),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RaftResponse {
    Vote(VoteResponse),
    Append(AppendResponse),
    Install(InstallResponse),
    Configure(ConfigurationResponse),
    Join(ConfigurationResponse),
    Leave(ConfigurationResponse),
    Reconfigure(ConfigurationResponse),
    Transfer(TransferResponse),
    ForceConfigure(ForceConfigureResponse),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteResponse {
    pub status: ResponseStatus,
    pub term: Term,
    pub voted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendRequest {
    pub term: Term,
    pub leader: MemberId,
    // "Previous log entry" is the log entry immediately preceding the new ones.
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<RaftLogEntry>,
    pub commit_index: Index,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendResponse {
    pub status: ResponseStatus,
    pub term: Term,
    pub succeeded: bool,
    pub last_log_index: Index,
    pub last_snapshot_index: Index,
    pub configuration_index: Index,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallRequest {
    pub current_term: Term,
    pub leader: MemberId,
    pub index: Index,
    pub term: Term,
    pub timestamp: DateTime<Utc>,
    pub snapshot_id: SnapshotId,
    pub chunk_id: ChunkId,
    pub next_chunk_id: Option<ChunkId>,
    pub total_count: u32,
    pub checksum: u32,
    pub data: Bytes,
    pub initial: bool,
    pub complete: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallResponse {
    pub status: ResponseStatus,
    pub term: Term,
}

/// Leader pushing its configuration to a member that hasn't seen it.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigureRequest {
    pub term: Term,
    pub leader: MemberId,
    pub index: Index,
    pub configuration_term: Term,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<RaftMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurationResponse {
    pub status: ResponseStatus,
    pub index: Index,
    /// Term of the configuration. On a Configure rejected for its term, the receiver's current term.
    pub term: Term,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<RaftMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinRequest {
    pub member: RaftMember,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeaveRequest {
    pub member: MemberId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconfigureRequest {
    pub members: Vec<RaftMember>,
    pub index: Index,
    pub term: Term,
}

/// Sent by a client to the leader to hand leadership to `member`, and by the leader to `member`
/// once it has caught up.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferRequest {
    pub member: MemberId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferResponse {
    pub status: ResponseStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForceConfigureRequest {
    pub term: Term,
    pub index: Index,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<RaftMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForceConfigureResponse {
    pub status: ResponseStatus,
    pub index: Index,
    pub term: Term,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponseStatus {
    Ok,
    Error(RaftError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaftError {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub leader: Option<MemberId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoLeader,
    IllegalMemberState,
    ProtocolError,
    ConfigurationError,
    QuorumUnsafe,
    Unavailable,
    ApplicationError,
    TransferInProgress,
}

impl ResponseStatus {
    pub fn error(kind: ErrorKind) -> Self {
        ResponseStatus::Error(RaftError {
            kind,
            message: None,
            leader: None,
        })
    }

    pub fn error_with_message<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        ResponseStatus::Error(RaftError {
            kind,
            message: Some(message.into()),
            leader: None,
        })
    }

    pub fn no_leader(leader: Option<MemberId>) -> Self {
        ResponseStatus::Error(RaftError {
            kind: ErrorKind::NoLeader,
            message: None,
            leader,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ResponseStatus::Ok => None,
            ResponseStatus::Error(e) => Some(e.kind),
        }
    }
}

impl ConfigurationResponse {
    pub fn ok(configuration: &Configuration) -> Self {
        ConfigurationResponse {
            status: ResponseStatus::Ok,
            index: configuration.index,
            term: configuration.term,
            timestamp: configuration.timestamp,
            members: configuration.members.clone(),
        }
    }

    pub fn error(status: ResponseStatus) -> Self {
        ConfigurationResponse {
            status,
            index: Index::ZERO,
            term: Term::ZERO,
            timestamp: Utc::now(),
            members: Vec::new(),
        }
    }

    pub fn rejected_at_term(status: ResponseStatus, current_term: Term) -> Self {
        ConfigurationResponse {
            term: current_term,
            ..ConfigurationResponse::error(status)
        }
    }
}

impl RaftRequest {
    pub fn name(&self) -> &'static str {
        match self {
            RaftRequest::Vote(_) => "Vote",
            RaftRequest::Append(_) => "Append",
            RaftRequest::Install(_) => "Install",
            RaftRequest::Configure(_) => "Configure",
            RaftRequest::Join(_) => "Join",
            RaftRequest::Leave(_) => "Leave",
            RaftRequest::Reconfigure(_) => "Reconfigure",
            RaftRequest::Transfer(_) => "Transfer",
            RaftRequest::ForceConfigure(_) => "ForceConfigure",
        }
    }

    /// The term carried by peer-to-peer requests. Client requests don't carry one.
    pub fn term(&self) -> Option<Term> {
        match self {
            RaftRequest::Vote(r) => Some(r.term),
            RaftRequest::Append(r) => Some(r.term),
            RaftRequest::Install(r) => Some(r.current_term),
            RaftRequest::Configure(r) => Some(r.term),
            RaftRequest::ForceConfigure(r) => Some(r.term),
            RaftRequest::Join(_) | RaftRequest::Leave(_) | RaftRequest::Reconfigure(_) | RaftRequest::Transfer(_) => {
                None
            }
        }
    }

    /// Definitional rejection of this request, shaped like its response.
    pub fn rejection(&self, status: ResponseStatus, current_term: Term) -> RaftResponse {
        match self {
            RaftRequest::Vote(_) => RaftResponse::Vote(VoteResponse {
                status,
                term: current_term,
                voted: false,
            }),
            RaftRequest::Append(_) => RaftResponse::Append(AppendResponse {
                status,
                term: current_term,
                succeeded: false,
                last_log_index: Index::ZERO,
                last_snapshot_index: Index::ZERO,
                configuration_index: Index::ZERO,
            }),
            RaftRequest::Install(_) => RaftResponse::Install(InstallResponse {
                status,
                term: current_term,
            }),
            RaftRequest::Configure(_) => {
                RaftResponse::Configure(ConfigurationResponse::rejected_at_term(status, current_term))
            }
            RaftRequest::Join(_) => RaftResponse::Join(ConfigurationResponse::error(status)),
            RaftRequest::Leave(_) => RaftResponse::Leave(ConfigurationResponse::error(status)),
            RaftRequest::Reconfigure(_) => RaftResponse::Reconfigure(ConfigurationResponse::error(status)),
            RaftRequest::Transfer(_) => RaftResponse::Transfer(TransferResponse { status }),
            RaftRequest::ForceConfigure(_) => RaftResponse::ForceConfigure(ForceConfigureResponse {
                status,
                index: Index::ZERO,
                term: current_term,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), MessageValidationError> {
        match self {
            RaftRequest::Vote(r) => {
                require_id("candidate", &r.candidate)?;
                require_term(r.term)?;
                if r.last_log_index.is_zero() && r.last_log_term != Term::ZERO {
                    return Err(MessageValidationError::InconsistentLastEntry);
                }
            }
            RaftRequest::Append(r) => {
                require_id("leader", &r.leader)?;
                require_term(r.term)?;
                if r.prev_log_index.is_zero() && r.prev_log_term != Term::ZERO {
                    return Err(MessageValidationError::InconsistentLastEntry);
                }
                let mut previous_term = r.prev_log_term;
                for entry in r.entries.iter() {
                    if entry.term > r.term || entry.term < previous_term {
                        return Err(MessageValidationError::EntryTermOutOfOrder(entry.term));
                    }
                    previous_term = entry.term;
                }
            }
            RaftRequest::Install(r) => {
                require_id("leader", &r.leader)?;
                require_term(r.current_term)?;
                if r.index.is_zero() {
                    return Err(MessageValidationError::ZeroSnapshotIndex);
                }
                if r.snapshot_id.as_str().is_empty() || r.chunk_id.as_str().is_empty() {
                    return Err(MessageValidationError::EmptyField("snapshot_id/chunk_id"));
                }
            }
            RaftRequest::Configure(r) => {
                require_id("leader", &r.leader)?;
                require_term(r.term)?;
                require_members(&r.members)?;
            }
            RaftRequest::Join(r) => require_id("member", &r.member.id)?,
            RaftRequest::Leave(r) => require_id("member", &r.member)?,
            RaftRequest::Reconfigure(r) => require_members(&r.members)?,
            RaftRequest::Transfer(r) => require_id("member", &r.member)?,
            RaftRequest::ForceConfigure(r) => {
                require_term(r.term)?;
                require_members(&r.members)?;
            }
        }

        Ok(())
    }
}

impl RaftResponse {
    pub fn status(&self) -> &ResponseStatus {
        match self {
            RaftResponse::Vote(r) => &r.status,
            RaftResponse::Append(r) => &r.status,
            RaftResponse::Install(r) => &r.status,
            RaftResponse::Configure(r)
            | RaftResponse::Join(r)
            | RaftResponse::Leave(r)
            | RaftResponse::Reconfigure(r) => &r.status,
            RaftResponse::Transfer(r) => &r.status,
            RaftResponse::ForceConfigure(r) => &r.status,
        }
    }

    pub fn configuration(&self) -> Option<&ConfigurationResponse> {
        match self {
            RaftResponse::Configure(r)
            | RaftResponse::Join(r)
            | RaftResponse::Leave(r)
            | RaftResponse::Reconfigure(r) => Some(r),
            _ => None,
        }
    }
}

fn require_id(field: &'static str, id: &MemberId) -> Result<(), MessageValidationError> {
    if id.as_str().is_empty() {
        Err(MessageValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

fn require_term(term: Term) -> Result<(), MessageValidationError> {
    if term == Term::ZERO {
        Err(MessageValidationError::ZeroTerm)
    } else {
        Ok(())
    }
}

fn require_members(members: &[RaftMember]) -> Result<(), MessageValidationError> {
    if members.is_empty() {
        return Err(MessageValidationError::NoMembers);
    }

    let mut seen = HashSet::with_capacity(members.len());
    for member in members {
        require_id("members", &member.id)?;
        if !seen.insert(&member.id) {
            return Err(MessageValidationError::DuplicateMember(member.id.clone()));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageValidationError {
    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("Term must be non-zero")]
    ZeroTerm,

    #[error("Entry at index 0 must have term 0")]
    InconsistentLastEntry,

    #[error("Entry term {0:?} is out of order")]
    EntryTermOutOfOrder(Term),

    #[error("Snapshot index must be non-zero")]
    ZeroSnapshotIndex,

    #[error("Configuration has no members")]
    NoMembers,

    #[error("Member {0} appears more than once")]
    DuplicateMember(MemberId),
}
