use crate::api::{CreateRaftNodeError, RaftOptions, RaftOptionsValidated};
use crate::commitlog::{InMemoryLog, Index};
use crate::replica::{
    AppendError, AppendInput, AppendListener, Callback, CommitListener, MemberId, NoopEntryValidator, NoopMetrics,
    OutboundRequest, PeerCallError, RaftLogEntry, RaftMember, RaftRequest, RaftResponse, ReadConsistency, ReadError,
    ReplyFromPeer, Replica, ReplicaConfig, Role, Term, VolatileLocalState,
};
use crate::simulation::queue::{self, Action, EventQueue, SharedQueue, SimScheduler, SimTransport};
use crate::snapshot::{InMemorySnapshotStore, SnapshotError, SnapshotMetadata};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

// A run that doesn't settle within this many events is livelocked.
const MAX_EVENTS_PER_RUN: usize = 2_000_000;

pub type SimulatedReplica = Replica<InMemoryLog<RaftLogEntry>, VolatileLocalState>;

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub seed: u64,
    pub raft_options: RaftOptions,
    /// Per-member replacements for `raft_options`.
    pub member_options: HashMap<MemberId, RaftOptions>,
    pub min_network_delay: Duration,
    pub max_network_delay: Duration,
    pub snapshot_chunk_size: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            seed: 0,
            raft_options: RaftOptions::default(),
            member_options: HashMap::new(),
            min_network_delay: Duration::from_millis(1),
            max_network_delay: Duration::from_millis(5),
            snapshot_chunk_size: 1024,
        }
    }
}

/// What an append went through, as seen by its listener.
#[derive(Debug, Default)]
pub struct AppendEvents {
    pub written: Option<Index>,
    pub write_error: Option<AppendError>,
    pub committed: Option<Index>,
    pub commit_error: Option<AppendError>,
}

#[derive(Clone, Default)]
pub struct AppendTracker(Arc<Mutex<AppendEvents>>);

impl AppendTracker {
    pub fn events(&self) -> MutexGuard<'_, AppendEvents> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn written(&self) -> Option<Index> {
        self.events().written
    }

    pub fn committed(&self) -> Option<Index> {
        self.events().committed
    }
}

impl AppendListener for AppendTracker {
    fn on_write(&mut self, index: Index) {
        self.events().written = Some(index);
    }

    fn on_write_error(&mut self, error: AppendError) {
        self.events().write_error = Some(error);
    }

    fn on_commit(&mut self, index: Index) {
        self.events().committed = Some(index);
    }

    fn on_commit_error(&mut self, _index: Index, error: AppendError) {
        self.events().commit_error = Some(error);
    }
}

#[derive(Clone, Default)]
struct CommitRecorder(Arc<Mutex<Vec<Index>>>);

impl CommitListener for CommitRecorder {
    fn on_commit(&mut self, index: Index, _entry: Option<&RaftLogEntry>) {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(index);
    }
}

struct SimNode {
    ordinal: u64,
    incarnation: u64,
    replica: Option<SimulatedReplica>,
    // Durable state of a crashed member, handed back on restart.
    stopped: Option<(InMemoryLog<RaftLogEntry>, VolatileLocalState)>,
    snapshot_store: InMemorySnapshotStore,
    commits: CommitRecorder,
}

struct AwaitingResponse {
    from: MemberId,
    from_incarnation: u64,
    reply_to: ReplyFromPeer,
    receiver: oneshot::Receiver<RaftResponse>,
    deadline: Instant,
}

/// Deterministic cluster of replicas on a virtual clock. Every member runs on the calling thread;
/// message delays, partitions and crashes are controlled by the test.
///
/// The cluster watches for split brain (two leaders in one term) and for commit indexes going
/// backwards, and records violations instead of panicking so tests can report them.
pub struct SimulatedCluster {
    logger: slog::Logger,
    options: SimulationOptions,
    queue: SharedQueue,
    nodes: BTreeMap<MemberId, SimNode>,
    isolated: HashSet<MemberId>,
    cut_links: HashSet<(MemberId, MemberId)>,
    awaiting: Vec<AwaitingResponse>,
    leaders_by_term: HashMap<Term, MemberId>,
    last_commit: HashMap<MemberId, (u64, Index)>,
    violations: Vec<String>,
}

impl SimulatedCluster {
    /// A cluster whose members all start active, bootstrapped with each other.
    pub fn new(logger: slog::Logger, options: SimulationOptions, members: &[&str]) -> Result<Self, CreateRaftNodeError> {
        let members = members.iter().map(|id| RaftMember::active(*id)).collect();
        Self::with_members(logger, options, members)
    }

    pub fn with_members(
        logger: slog::Logger,
        options: SimulationOptions,
        members: Vec<RaftMember>,
    ) -> Result<Self, CreateRaftNodeError> {
        let queue = EventQueue::new(
            StdRng::seed_from_u64(options.seed),
            options.min_network_delay,
            options.max_network_delay,
        );
        let mut cluster = SimulatedCluster {
            logger,
            options,
            queue: Arc::new(Mutex::new(queue)),
            nodes: BTreeMap::new(),
            isolated: HashSet::new(),
            cut_links: HashSet::new(),
            awaiting: Vec::new(),
            leaders_by_term: HashMap::new(),
            last_commit: HashMap::new(),
            violations: Vec::new(),
        };

        for member in members.iter() {
            cluster.start_new_node(member.id.clone(), members.clone())?;
        }
        Ok(cluster)
    }

    /// Starts a member with no configuration. It sits idle until a leader adds it with a join.
    pub fn add_node(&mut self, id: &str) -> Result<(), CreateRaftNodeError> {
        self.start_new_node(MemberId::new(id), Vec::new())
    }

    fn start_new_node(&mut self, id: MemberId, initial_members: Vec<RaftMember>) -> Result<(), CreateRaftNodeError> {
        let node = SimNode {
            ordinal: self.nodes.len() as u64,
            incarnation: 0,
            replica: None,
            stopped: None,
            snapshot_store: InMemorySnapshotStore::with_chunk_size(self.options.snapshot_chunk_size),
            commits: CommitRecorder::default(),
        };
        self.nodes.insert(id.clone(), node);
        self.boot(&id, initial_members, InMemoryLog::new(), VolatileLocalState::new(id.clone()))
    }

    fn boot(
        &mut self,
        id: &MemberId,
        initial_members: Vec<RaftMember>,
        log: InMemoryLog<RaftLogEntry>,
        local_state: VolatileLocalState,
    ) -> Result<(), CreateRaftNodeError> {
        let raft_options = self
            .options
            .member_options
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.options.raft_options.clone());
        let options = RaftOptionsValidated::try_from(raft_options).map_err(CreateRaftNodeError::IllegalOptions)?;
        let seed = self.options.seed;
        let logger = self.logger.new(slog::o!("Member" => id.to_string()));
        let queue = self.queue.clone();

        let node = match self.nodes.get_mut(id) {
            Some(node) => node,
            None => return Ok(()),
        };
        node.incarnation += 1;
        node.commits = CommitRecorder::default();
        let rng_seed = seed
            .wrapping_add(node.ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add(node.incarnation);

        let mut replica = Replica::new(ReplicaConfig {
            logger,
            my_member_id: id.clone(),
            initial_members,
            log,
            local_state,
            snapshot_store: Arc::new(node.snapshot_store.clone()),
            transport: Box::new(SimTransport {
                member: id.clone(),
                incarnation: node.incarnation,
                queue: queue.clone(),
            }),
            scheduler: Box::new(SimScheduler {
                member: id.clone(),
                incarnation: node.incarnation,
                queue,
            }),
            rng: StdRng::seed_from_u64(rng_seed),
            options,
            entry_validator: Box::new(NoopEntryValidator),
            metrics: Arc::new(NoopMetrics),
        })?;
        replica.add_commit_listener(Box::new(node.commits.clone()));
        node.replica = Some(replica);

        Ok(())
    }

    /// Stops a member, keeping its log, persisted state and snapshots for `restart()`.
    pub fn crash(&mut self, id: &str) {
        let id = MemberId::new(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(replica) = node.replica.take() {
                slog::info!(self.logger, "Crashing {}", id);
                node.stopped = Some(replica.shutdown());
            }
        }
        self.last_commit.remove(&id);
    }

    pub fn restart(&mut self, id: &str) -> Result<(), CreateRaftNodeError> {
        let id = MemberId::new(id);
        let stopped = self.nodes.get_mut(&id).and_then(|node| node.stopped.take());
        match stopped {
            Some((log, local_state)) => {
                slog::info!(self.logger, "Restarting {}", id);
                self.boot(&id, Vec::new(), log, local_state)
            }
            None => Ok(()),
        }
    }

    /// Cuts `id` off from every other member. Local calls still reach it.
    pub fn isolate(&mut self, id: &str) {
        self.isolated.insert(MemberId::new(id));
    }

    pub fn partition(&mut self, a: &str, b: &str) {
        self.cut_links.insert(link(&MemberId::new(a), &MemberId::new(b)));
    }

    pub fn heal(&mut self) {
        self.isolated.clear();
        self.cut_links.clear();
    }

    pub fn now(&self) -> Instant {
        queue::lock(&self.queue).now()
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn replica(&self, id: &str) -> Option<&SimulatedReplica> {
        self.nodes.get(&MemberId::new(id)).and_then(|node| node.replica.as_ref())
    }

    pub fn replica_mut(&mut self, id: &str) -> Option<&mut SimulatedReplica> {
        self.nodes
            .get_mut(&MemberId::new(id))
            .and_then(|node| node.replica.as_mut())
    }

    pub fn snapshot_store(&self, id: &str) -> Option<&InMemorySnapshotStore> {
        self.nodes.get(&MemberId::new(id)).map(|node| &node.snapshot_store)
    }

    /// Indexes committed by the current incarnation of `id`, in delivery order.
    pub fn committed_indexes(&self, id: &str) -> Vec<Index> {
        match self.nodes.get(&MemberId::new(id)) {
            Some(node) => node.commits.0.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            None => Vec::new(),
        }
    }

    /// The running leader with the highest term, if any.
    pub fn leader(&self) -> Option<MemberId> {
        self.running()
            .filter(|(_, replica)| replica.role() == Role::Leader)
            .max_by_key(|(_, replica)| replica.current_term())
            .map(|(id, _)| id.clone())
    }

    pub fn safety_violations(&self) -> &[String] {
        &self.violations
    }

    pub fn append(&mut self, id: &str, input: AppendInput) -> AppendTracker {
        let tracker = AppendTracker::default();
        match self.replica_mut(id) {
            Some(replica) => replica.append(input, Box::new(tracker.clone())),
            None => tracker.clone().on_write_error(AppendError::Inactive),
        }
        self.after_event();

        tracker
    }

    pub fn read(&mut self, id: &str, consistency: ReadConsistency) -> oneshot::Receiver<Result<Index, ReadError>> {
        let (callback, receiver) = Callback::new();
        match self.replica_mut(id) {
            Some(replica) => replica.read(consistency, callback),
            None => callback.send(Err(ReadError::Inactive)),
        }
        self.after_event();

        receiver
    }

    /// Hands a client request (join, leave, transfer...) straight to `id`, bypassing the network.
    /// A crashed member drops it, which closes the receiver.
    pub fn request(&mut self, id: &str, request: RaftRequest) -> oneshot::Receiver<RaftResponse> {
        let (callback, receiver) = Callback::new();
        if let Some(replica) = self.replica_mut(id) {
            replica.handle_request(request, callback);
        }
        self.after_event();

        receiver
    }

    pub fn take_snapshot(&mut self, id: &str, index: Index, data: Bytes) -> Result<SnapshotMetadata, SnapshotError> {
        let result = match self.replica_mut(id) {
            Some(replica) => replica.take_snapshot(index, data),
            None => Err(SnapshotError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "member is down",
            ))),
        };
        self.after_event();
        result
    }

    pub fn compact(&mut self, id: &str, index: Index) -> io::Result<Index> {
        let result = match self.replica_mut(id) {
            Some(replica) => replica.compact(index),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "member is down")),
        };
        self.after_event();
        result
    }

    /// Runs every event due within `duration`, then moves the clock to its end.
    pub fn run_for(&mut self, duration: Duration) {
        let limit = self.now() + duration;
        let mut processed = 0;
        while processed < MAX_EVENTS_PER_RUN && self.step(limit) {
            processed += 1;
        }
        if processed == MAX_EVENTS_PER_RUN {
            slog::warn!(self.logger, "Simulation hit the event cap before {:?}", duration);
        }
        queue::lock(&self.queue).advance_to(limit);
    }

    /// Runs until `condition` holds or `max_duration` passes. Returns whether the condition held.
    pub fn run_until<F>(&mut self, max_duration: Duration, mut condition: F) -> bool
    where
        F: FnMut(&SimulatedCluster) -> bool,
    {
        let limit = self.now() + max_duration;
        let mut processed = 0;
        while !condition(self) {
            if processed >= MAX_EVENTS_PER_RUN || !self.step(limit) {
                queue::lock(&self.queue).advance_to(limit);
                return condition(self);
            }
            processed += 1;
        }

        true
    }

    /// Runs until some member is leader. Returns its id.
    pub fn await_leader(&mut self, max_duration: Duration) -> Option<MemberId> {
        self.run_until(max_duration, |cluster| cluster.leader().is_some());
        self.leader()
    }

    /// Whether every pair of running members agrees on every index where their terms match, and
    /// everything before it.
    pub fn check_log_matching(&self) -> Result<(), String> {
        let running: Vec<_> = self.running().collect();
        for (i, (a_id, a)) in running.iter().enumerate() {
            for (b_id, b) in running.iter().skip(i + 1) {
                let first = std::cmp::max(a.first_log_index(), b.first_log_index());
                let last = std::cmp::min(a.last_log_index(), b.last_log_index());
                let mut index = last;
                let mut matched = false;
                while index >= first && !index.is_zero() {
                    let a_entry = a.read_log_entry(index).map_err(|e| e.to_string())?;
                    let b_entry = b.read_log_entry(index).map_err(|e| e.to_string())?;
                    match (a_entry, b_entry) {
                        (Some(a_entry), Some(b_entry)) => {
                            if matched && a_entry != b_entry {
                                return Err(format!("{} and {} diverge at {:?}", a_id, b_id, index));
                            }
                            if a_entry.term == b_entry.term {
                                matched = true;
                                if a_entry != b_entry {
                                    return Err(format!("{} and {} differ at {:?}", a_id, b_id, index));
                                }
                            }
                        }
                        _ => break,
                    }
                    index = index.minus(1);
                }
            }
        }

        Ok(())
    }

    fn running(&self) -> impl Iterator<Item = (&MemberId, &SimulatedReplica)> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.replica.as_ref().map(|replica| (id, replica)))
    }

    fn step(&mut self, limit: Instant) -> bool {
        let action = match queue::lock(&self.queue).pop_until(limit) {
            Some(action) => action,
            None => return false,
        };

        match action {
            Action::Timer {
                member,
                incarnation,
                event,
                cancellation,
            } => {
                if !cancellation.is_cancelled() {
                    if let Some(replica) = self.live_replica(&member, incarnation) {
                        replica.handle_timer(event);
                    }
                }
            }
            Action::Deliver {
                from,
                from_incarnation,
                outbound,
            } => self.deliver(from, from_incarnation, outbound),
            Action::Reply {
                to,
                incarnation,
                mut reply,
            } => {
                if !self.is_reachable(&to, &reply.descriptor.peer_id) && reply.result.is_ok() {
                    reply.result = Err(PeerCallError::Unreachable(reply.descriptor.peer_id.to_string()));
                }
                if let Some(replica) = self.live_replica(&to, incarnation) {
                    replica.handle_peer_reply(reply);
                }
            }
        }
        self.after_event();

        true
    }

    fn deliver(&mut self, from: MemberId, from_incarnation: u64, outbound: OutboundRequest) {
        let to = outbound.descriptor.peer_id.clone();
        let reply_to = ReplyFromPeer {
            descriptor: outbound.descriptor,
            result: Err(PeerCallError::Unreachable(to.to_string())),
        };
        let reachable = self.is_reachable(&from, &to);
        let target = if reachable {
            self.nodes.get_mut(&to).and_then(|node| node.replica.as_mut())
        } else {
            None
        };

        match target {
            Some(replica) => {
                let (callback, receiver) = Callback::new();
                replica.handle_request(outbound.request, callback);
                let deadline = queue::lock(&self.queue).now() + self.options_for(&from).peer_request_timeout;
                self.awaiting.push(AwaitingResponse {
                    from,
                    from_incarnation,
                    reply_to,
                    receiver,
                    deadline,
                });
            }
            None => self.schedule_reply(from, from_incarnation, reply_to),
        }
    }

    fn options_for(&self, id: &MemberId) -> RaftOptionsValidated {
        let options = self
            .options
            .member_options
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.options.raft_options.clone());
        RaftOptionsValidated::try_from(options).unwrap_or_default()
    }

    fn schedule_reply(&mut self, to: MemberId, incarnation: u64, reply: ReplyFromPeer) {
        let mut queue = queue::lock(&self.queue);
        let delay = queue.network_delay();
        queue.push(delay, Action::Reply { to, incarnation, reply });
    }

    fn live_replica(&mut self, id: &MemberId, incarnation: u64) -> Option<&mut SimulatedReplica> {
        match self.nodes.get_mut(id) {
            Some(node) if node.incarnation == incarnation => node.replica.as_mut(),
            _ => None,
        }
    }

    fn is_reachable(&self, a: &MemberId, b: &MemberId) -> bool {
        !self.isolated.contains(a) && !self.isolated.contains(b) && !self.cut_links.contains(&link(a, b))
    }

    fn after_event(&mut self) {
        self.collect_responses();
        self.observe();
    }

    // Responses can come back long after the request, e.g. a join answers once committed.
    fn collect_responses(&mut self) {
        let now = queue::lock(&self.queue).now();
        let mut still_waiting = Vec::new();
        for mut awaiting in std::mem::take(&mut self.awaiting) {
            let result = match awaiting.receiver.try_recv() {
                Ok(response) => Ok(response),
                Err(oneshot::error::TryRecvError::Closed) => Err(PeerCallError::Unreachable(
                    awaiting.reply_to.descriptor.peer_id.to_string(),
                )),
                Err(oneshot::error::TryRecvError::Empty) if now >= awaiting.deadline => Err(PeerCallError::Timeout),
                Err(oneshot::error::TryRecvError::Empty) => {
                    still_waiting.push(awaiting);
                    continue;
                }
            };
            let mut reply = awaiting.reply_to;
            reply.result = result;
            self.schedule_reply(awaiting.from, awaiting.from_incarnation, reply);
        }
        self.awaiting = still_waiting;
    }

    fn observe(&mut self) {
        let mut findings = Vec::new();
        for (id, node) in self.nodes.iter() {
            let replica = match node.replica.as_ref() {
                Some(replica) => replica,
                None => continue,
            };

            if replica.role() == Role::Leader {
                let term = replica.current_term();
                match self.leaders_by_term.get(&term) {
                    Some(leader) if leader != id => {
                        findings.push(format!("Two leaders in term {:?}: {} and {}", term, leader, id))
                    }
                    Some(_) => {}
                    None => {
                        self.leaders_by_term.insert(term, id.clone());
                    }
                }
            }

            let commit_index = replica.commit_index();
            if let Some((incarnation, last)) = self.last_commit.get(id) {
                if *incarnation == node.incarnation && commit_index < *last {
                    findings.push(format!(
                        "Commit index of {} went from {:?} to {:?}",
                        id, last, commit_index
                    ));
                }
            }
            self.last_commit.insert(id.clone(), (node.incarnation, commit_index));
        }

        for finding in findings {
            slog::error!(self.logger, "{}", finding);
            self.violations.push(finding);
        }
    }
}

fn link(a: &MemberId, b: &MemberId) -> (MemberId, MemberId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}
