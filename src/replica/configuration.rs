use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::{MemberId, MemberType, RaftMember};
use chrono::{DateTime, Utc};

/// A cluster membership view. Index 0 is the bootstrap configuration that every initial member
/// starts with.
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    pub index: Index,
    pub term: Term,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<RaftMember>,
    pub force: bool,
}

impl Configuration {
    pub fn new(index: Index, term: Term, members: Vec<RaftMember>) -> Self {
        Configuration {
            index,
            term,
            timestamp: Utc::now(),
            members,
            force: false,
        }
    }

    pub fn member(&self, id: &MemberId) -> Option<&RaftMember> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn member_type(&self, id: &MemberId) -> Option<MemberType> {
        self.member(id).map(|m| m.member_type)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.member(id).is_some()
    }

    pub fn voters(&self) -> impl Iterator<Item = &MemberId> {
        self.members
            .iter()
            .filter(|m| m.member_type.is_voting())
            .map(|m| &m.id)
    }

    pub fn num_voters(&self) -> usize {
        self.voters().count()
    }

    /// Majority of the ACTIVE members.
    pub fn quorum(&self) -> usize {
        Self::quorum_of(self.num_voters())
    }

    pub fn quorum_of(num_voters: usize) -> usize {
        (num_voters / 2) + 1
    }

    pub fn same_members(&self, members: &[RaftMember]) -> bool {
        self.members.len() == members.len() && members.iter().all(|m| self.members.contains(m))
    }
}

/// ClusterState tracks the committed and effective configurations of this replica.
///
/// Configuration entries take effect as soon as they're appended to the log, so entries that are
/// still uncommitted are kept around in case the log gets truncated and we need to revert.
pub(crate) struct ClusterState {
    my_member_id: MemberId,
    committed: Option<Configuration>,
    // Appended (or installed) but not yet committed, ascending by index.
    uncommitted: Vec<Configuration>,
}

impl ClusterState {
    pub(crate) fn new(my_member_id: MemberId, committed: Option<Configuration>) -> Self {
        ClusterState {
            my_member_id,
            committed,
            uncommitted: Vec::new(),
        }
    }

    pub(crate) fn effective(&self) -> Option<&Configuration> {
        self.uncommitted.last().or_else(|| self.committed.as_ref())
    }

    pub(crate) fn committed(&self) -> Option<&Configuration> {
        self.committed.as_ref()
    }

    pub(crate) fn configuration_index(&self) -> Index {
        self.effective().map(|c| c.index).unwrap_or(Index::ZERO)
    }

    pub(crate) fn committed_index(&self) -> Index {
        self.committed.as_ref().map(|c| c.index).unwrap_or(Index::ZERO)
    }

    pub(crate) fn has_configuration(&self) -> bool {
        self.effective().is_some()
    }

    pub(crate) fn is_change_in_flight(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    pub(crate) fn my_type(&self) -> Option<MemberType> {
        self.effective().and_then(|c| c.member_type(&self.my_member_id))
    }

    pub(crate) fn is_voter(&self, id: &MemberId) -> bool {
        matches!(self.effective().and_then(|c| c.member_type(id)), Some(MemberType::Active))
    }

    /// ACTIVE members other than me.
    pub(crate) fn voting_peers(&self) -> Vec<MemberId> {
        match self.effective() {
            None => Vec::new(),
            Some(c) => c.voters().filter(|id| *id != &self.my_member_id).cloned().collect(),
        }
    }

    /// Everyone the leader should replicate to.
    pub(crate) fn replication_targets(&self) -> Vec<MemberId> {
        match self.effective() {
            None => Vec::new(),
            Some(c) => c
                .members
                .iter()
                .filter(|m| m.id != self.my_member_id && m.member_type.is_replication_target())
                .map(|m| m.id.clone())
                .collect(),
        }
    }

    pub(crate) fn quorum(&self) -> usize {
        self.effective().map(|c| c.quorum()).unwrap_or(1)
    }

    /// A configuration entry was written to the log.
    pub(crate) fn append(&mut self, configuration: Configuration) {
        self.uncommitted.retain(|c| c.index < configuration.index);
        self.uncommitted.push(configuration);
    }

    /// A configuration arrived outside of the log (Configure or ForceConfigure). It replaces
    /// anything pending at or after its index.
    pub(crate) fn install(&mut self, configuration: Configuration) {
        self.append(configuration);
    }

    /// The log was truncated starting at `from_index`; drop configurations that went with it.
    /// Returns true if the effective configuration changed.
    pub(crate) fn truncate(&mut self, from_index: Index) -> bool {
        let before = self.configuration_index();
        self.uncommitted.retain(|c| c.index < from_index);
        before != self.configuration_index()
    }

    /// Promote pending configurations up to `commit_index`. Returns the newly committed
    /// configuration, if it changed.
    pub(crate) fn commit(&mut self, commit_index: Index) -> Option<Configuration> {
        let mut newly_committed = None;
        while let Some(first) = self.uncommitted.first() {
            if first.index > commit_index {
                break;
            }
            newly_committed = Some(self.uncommitted.remove(0));
        }

        if let Some(c) = newly_committed.as_ref() {
            self.committed.replace(c.clone());
        }
        newly_committed
    }

    /// Force mode installs and commits at once.
    pub(crate) fn install_committed(&mut self, configuration: Configuration) {
        self.uncommitted.clear();
        self.committed.replace(configuration);
    }
}
