use crate::actor::WeakActorClient;
use crate::network::peer_client::{PeerClient, PeerConnector};
use crate::replica::{MemberId, PeerCallError, RaftRequest, RaftResponse};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process network between nodes of the same runtime. Links can be cut to simulate
/// partitions.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<MemberId, WeakActorClient>,
    isolated: HashSet<MemberId>,
    // Stored both ways round.
    cut_links: HashSet<(MemberId, MemberId)>,
}

impl NetworkState {
    fn can_reach(&self, from: &MemberId, to: &MemberId) -> bool {
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.cut_links.contains(&(from.clone(), to.clone()))
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, member: MemberId, actor_client: WeakActorClient) {
        self.lock().nodes.insert(member, actor_client);
    }

    pub fn remove(&self, member: &MemberId) {
        self.lock().nodes.remove(member);
    }

    /// Connections as seen from `me`.
    pub fn connector(&self, me: MemberId) -> Arc<dyn PeerConnector> {
        Arc::new(LocalConnector {
            network: self.clone(),
            me,
        })
    }

    /// Cut `member` off from everyone.
    pub fn isolate(&self, member: &MemberId) {
        self.lock().isolated.insert(member.clone());
    }

    pub fn cut(&self, a: &MemberId, b: &MemberId) {
        let mut state = self.lock();
        state.cut_links.insert((a.clone(), b.clone()));
        state.cut_links.insert((b.clone(), a.clone()));
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.isolated.clear();
        state.cut_links.clear();
    }

    fn can_reach(&self, from: &MemberId, to: &MemberId) -> bool {
        self.lock().can_reach(from, to)
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        // Nothing panics while holding the lock, a poisoned state is still consistent.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct LocalConnector {
    network: LocalNetwork,
    me: MemberId,
}

impl PeerConnector for LocalConnector {
    fn connect(&self, member: &MemberId) -> Option<Arc<dyn PeerClient>> {
        if !self.network.lock().nodes.contains_key(member) {
            return None;
        }

        Some(Arc::new(LocalPeerClient {
            network: self.network.clone(),
            from: self.me.clone(),
            to: member.clone(),
        }))
    }
}

struct LocalPeerClient {
    network: LocalNetwork,
    from: MemberId,
    to: MemberId,
}

#[async_trait::async_trait]
impl PeerClient for LocalPeerClient {
    async fn call(&self, request: RaftRequest) -> Result<RaftResponse, PeerCallError> {
        let unreachable = || PeerCallError::Unreachable(format!("{} can't reach {}", self.from, self.to));
        if !self.network.can_reach(&self.from, &self.to) {
            return Err(unreachable());
        }

        let actor_client = self
            .network
            .lock()
            .nodes
            .get(&self.to)
            .and_then(|weak| weak.upgrade())
            .ok_or_else(unreachable)?;
        let response = actor_client.request(request).await.map_err(|_| unreachable())?;

        // The link may have been cut while the request was in flight.
        if !self.network.can_reach(&self.to, &self.from) {
            return Err(unreachable());
        }
        Ok(response)
    }
}
