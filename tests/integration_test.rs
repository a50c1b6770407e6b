use bytes::Bytes;
use raft_consensus::{
    create_local_raft_node, create_raft_node, AppendError, AppendInput, ApplicationEntry, CommitStream,
    Configuration, CreateRaftNodeError, EntryValidator, FailureListener, FatalError, InMemoryLog, Index, LocalNetwork,
    Log, MemberId, PersistentLocalState, RaftLogEntry, RaftMember, RaftNode, RaftNodeConfig, RaftOptions,
    ReadConsistency, Role, StartupError, Term, VolatileLocalState,
};
use slog::Drain;
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

fn fast_options() -> RaftOptions {
    RaftOptions {
        heartbeat_interval: Some(Duration::from_millis(20)),
        election_timeout_min: Some(Duration::from_millis(150)),
        election_timeout_max: Some(Duration::from_millis(300)),
        peer_request_timeout: Some(Duration::from_millis(100)),
        leader_lease_duration: Some(Duration::from_millis(100)),
        ..RaftOptions::default()
    }
}

fn entry(position: u64, data: &'static str) -> AppendInput {
    AppendInput::Application(ApplicationEntry {
        lowest_position: position,
        highest_position: position,
        data: Bytes::from_static(data.as_bytes()),
    })
}

fn config(id: &str, members: &[RaftMember], network: &LocalNetwork) -> RaftNodeConfig {
    let mut config = RaftNodeConfig::local(
        create_root_logger_for_stdout(id.to_string()),
        MemberId::new(id),
        members.to_vec(),
        network,
    );
    config.options = fast_options();
    config
}

async fn start_cluster(ids: &[&str]) -> Result<(LocalNetwork, HashMap<String, (RaftNode, CommitStream)>), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let members: Vec<RaftMember> = ids.iter().map(|id| RaftMember::active(*id)).collect();
    let mut nodes = HashMap::with_capacity(ids.len());
    for id in ids {
        let node = create_local_raft_node(
            config(id, &members, &network),
            InMemoryLog::new(),
            VolatileLocalState::new(MemberId::new(*id)),
            &network,
        )
        .await?;
        nodes.insert(id.to_string(), node);
    }

    Ok((network, nodes))
}

async fn discover_leader_id(node: &RaftNode, timeout: Duration) -> MemberId {
    let mut role_changes = node.role_changes();
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(leader) = role_changes.current().leader {
            return leader;
        }
        tokio::time::timeout_at(deadline, role_changes.next())
            .await
            .expect("Timeout waiting for leader election")
            .expect("Expected role changes to be alive");
    }
}

async fn next_application_entry(commit_stream: &mut CommitStream) -> (Index, Bytes) {
    loop {
        let committed = tokio::time::timeout(Duration::from_secs(5), commit_stream.next())
            .await
            .expect("Timeout waiting for commit")
            .expect("Commit stream closed");
        if let Some(application) = committed.entry.as_ref().and_then(|e| e.application()) {
            return (committed.index, application.data.clone());
        }
    }
}

#[tokio::test]
async fn leader_election() -> Result<(), Box<dyn Error>> {
    let (_network, nodes) = start_cluster(&["replica-1", "replica-2", "replica-3", "replica-4", "replica-5"]).await?;

    let (_, (any_node, _)) = nodes.iter().next().unwrap();
    let leader_id = discover_leader_id(any_node, Duration::from_secs(10)).await;

    let (leader, _) = nodes.get(leader_id.as_str()).expect("Leader is not a member");
    let status = leader.status().await?;
    assert_eq!(status.role.role, Role::Leader);
    assert_eq!(status.configuration.map(|c| c.num_voters()), Some(5));

    // Everyone else redirects.
    for (id, (node, _)) in nodes.iter() {
        if id.as_str() == leader_id.as_str() {
            continue;
        }
        match node.append(entry(1, "redirect me")).await {
            Err(AppendError::NotLeader(hint)) => assert_eq!(hint, leader_id),
            Err(AppendError::NoLeader) => {}
            other => panic!("Expected redirect, got {:?}", other.map(|h| h.index())),
        }
    }

    for (_, (node, _)) in nodes {
        node.shutdown().await;
    }
    Ok(())
}

#[tokio::test]
async fn simple_commit() -> Result<(), Box<dyn Error>> {
    let (_network, mut nodes) = start_cluster(&["replica-1", "replica-2", "replica-3"]).await?;
    let leader_id = discover_leader_id(&nodes["replica-1"].0, Duration::from_secs(10)).await;

    for &(position, data) in [(1, "Hello world"), (2, "it's me")].iter() {
        let handle = nodes[leader_id.as_str()].0.append(entry(position, data)).await?;
        let index = handle.index();
        assert_eq!(handle.committed().await?, index);

        // Every member observes the entry in its commit stream.
        for (_, (_, commit_stream)) in nodes.iter_mut() {
            let (committed_index, committed_data) = next_application_entry(commit_stream).await;
            assert_eq!(committed_index, index);
            assert_eq!(committed_data, Bytes::from_static(data.as_bytes()));
        }
    }

    let leader = &nodes[leader_id.as_str()].0;
    let read_index = leader.read(ReadConsistency::Linearizable).await?;
    assert!(read_index >= Index::new(3));
    Ok(())
}

#[tokio::test]
async fn isolated_leader_is_replaced() -> Result<(), Box<dyn Error>> {
    let (network, nodes) = start_cluster(&["replica-1", "replica-2", "replica-3"]).await?;
    let old_leader = discover_leader_id(&nodes["replica-1"].0, Duration::from_secs(10)).await;

    network.isolate(&old_leader);
    let (other_id, (other, _)) = nodes
        .iter()
        .find(|(id, _)| id.as_str() != old_leader.as_str())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut role_changes = other.role_changes();
    loop {
        let current = role_changes.current();
        if current.leader.is_some() && current.leader.as_ref() != Some(&old_leader) {
            break;
        }
        tokio::time::timeout_at(deadline, role_changes.next())
            .await
            .unwrap_or_else(|_| panic!("{} never saw a new leader", other_id));
    }

    network.heal();
    Ok(())
}

/// Refuses application entries whose positions don't follow the last one.
struct ContiguousPositions;

impl EntryValidator for ContiguousPositions {
    fn validate(&self, last_entry: Option<&ApplicationEntry>, candidate: &ApplicationEntry) -> Result<(), String> {
        let expected = last_entry.map(|e| e.highest_position + 1).unwrap_or(1);
        if candidate.lowest_position == expected {
            Ok(())
        } else {
            Err(format!("Expected position {}, got {}", expected, candidate.lowest_position))
        }
    }
}

#[tokio::test]
async fn validator_vetoes_entries() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let members = vec![RaftMember::active("solo")];
    let mut config = config("solo", &members, &network);
    config.entry_validator = Box::new(ContiguousPositions);
    let (node, _commits) = create_local_raft_node(
        config,
        InMemoryLog::new(),
        VolatileLocalState::new(MemberId::new("solo")),
        &network,
    )
    .await?;
    discover_leader_id(&node, Duration::from_secs(10)).await;

    node.append(entry(1, "first")).await?.committed().await?;
    match node.append(entry(3, "gap")).await {
        Err(AppendError::ValidationRejected(reason)) => assert!(reason.contains("Expected position 2")),
        other => panic!("Expected veto, got {:?}", other.map(|h| h.index())),
    }
    node.append(entry(2, "second")).await?.committed().await?;

    node.shutdown().await;
    Ok(())
}

/// Log that starts failing writes once `healthy_appends` is used up.
struct FailingLog {
    inner: InMemoryLog<RaftLogEntry>,
    healthy_appends: usize,
}

impl Log<RaftLogEntry> for FailingLog {
    fn append(&mut self, entry: RaftLogEntry) -> io::Result<Index> {
        if self.healthy_appends == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.healthy_appends -= 1;
        self.inner.append(entry)
    }

    fn read(&self, index: Index) -> io::Result<Option<RaftLogEntry>> {
        self.inner.read(index)
    }

    fn truncate(&mut self, index: Index) -> io::Result<()> {
        self.inner.truncate(index)
    }

    fn compact(&mut self, index: Index) -> io::Result<()> {
        self.inner.compact(index)
    }

    fn reset(&mut self, next_index: Index) -> io::Result<()> {
        self.inner.reset(next_index)
    }

    fn first_index(&self) -> Index {
        self.inner.first_index()
    }

    fn next_index(&self) -> Index {
        self.inner.next_index()
    }
}

#[derive(Clone, Default)]
struct RecordingFailureListener(Arc<Mutex<Vec<String>>>);

impl FailureListener for RecordingFailureListener {
    fn on_failure(&mut self, error: &FatalError) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

#[tokio::test]
async fn log_failure_makes_replica_inactive() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let members = vec![RaftMember::active("solo")];
    let failures = RecordingFailureListener::default();
    let mut config = config("solo", &members, &network);
    config.failure_listener = Some(Box::new(failures.clone()));
    let log = FailingLog {
        inner: InMemoryLog::new(),
        // The leader's initial entry.
        healthy_appends: 1,
    };
    let (node, _commits) =
        create_local_raft_node(config, log, VolatileLocalState::new(MemberId::new("solo")), &network).await?;
    discover_leader_id(&node, Duration::from_secs(10)).await;

    match node.append(entry(1, "doomed")).await {
        Err(AppendError::LocalIo(_)) => {}
        other => panic!("Expected write failure, got {:?}", other.map(|h| h.index())),
    }
    assert_eq!(node.status().await?.role.role, Role::Inactive);
    assert_eq!(failures.0.lock().unwrap().len(), 1);

    match node.append(entry(1, "again")).await {
        Err(AppendError::Inactive) => {}
        other => panic!("Expected inactive, got {:?}", other.map(|h| h.index())),
    }
    Ok(())
}

#[tokio::test]
async fn restart_with_different_members_is_refused() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let persisted = vec![RaftMember::active("a"), RaftMember::active("b"), RaftMember::active("c")];
    let mut local_state = VolatileLocalState::new(MemberId::new("a"));
    local_state.store_configuration(&Configuration::new(Index::ZERO, Term::ZERO, persisted))?;

    let given = vec![RaftMember::active("a"), RaftMember::active("b"), RaftMember::active("d")];
    let result = create_raft_node(config("a", &given, &network), InMemoryLog::new(), local_state).await;

    match result {
        Err(CreateRaftNodeError::Startup(StartupError::ConfigurationMismatch { persisted, given })) => {
            assert!(persisted.contains(&MemberId::new("c")));
            assert!(given.contains(&MemberId::new("d")));
        }
        Err(e) => panic!("Unexpected error {}", e),
        Ok(_) => panic!("Started with mismatched members"),
    }
    Ok(())
}

#[tokio::test]
async fn illegal_options_are_refused() {
    let network = LocalNetwork::new();
    let mut config = config("a", &[RaftMember::active("a")], &network);
    config.options.heartbeat_interval = Some(Duration::from_secs(1));

    let result = create_raft_node(config, InMemoryLog::new(), VolatileLocalState::new(MemberId::new("a"))).await;
    assert!(matches!(result, Err(CreateRaftNodeError::IllegalOptions(_))));
}

fn create_root_logger_for_stdout(replica_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id))
}
