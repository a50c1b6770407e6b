use chrono::{DateTime, Utc};
use std::fmt;

/// MemberId...or maybe it should be NodeId or ServerId. Idk. Identity of a cluster member.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemberId(String);

impl MemberId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId::new(id)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemberType {
    /// Votes, campaigns and counts towards quorum.
    Active,
    /// Receives committed entries only.
    Passive,
    /// Known to the cluster but receives nothing.
    Reserve,
    /// Like passive, never promoted implicitly.
    Learner,
}

impl MemberType {
    pub fn is_voting(&self) -> bool {
        matches!(self, MemberType::Active)
    }

    /// Whether the leader replicates to members of this type.
    pub fn is_replication_target(&self) -> bool {
        !matches!(self, MemberType::Reserve)
    }
}

#[derive(Clone, Debug)]
pub struct RaftMember {
    pub id: MemberId,
    pub member_type: MemberType,
    pub last_updated: DateTime<Utc>,
}

impl RaftMember {
    pub fn new(id: MemberId, member_type: MemberType) -> Self {
        RaftMember {
            id,
            member_type,
            last_updated: Utc::now(),
        }
    }

    pub fn active<S: Into<String>>(id: S) -> Self {
        Self::new(MemberId::new(id), MemberType::Active)
    }
}

// Timestamps are informational; two members are the same if they agree on identity and type.
impl PartialEq for RaftMember {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.member_type == other.member_type
    }
}

impl Eq for RaftMember {}
