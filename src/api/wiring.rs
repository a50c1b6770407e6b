use crate::actor::{ActorClient, ReplicaActor};
use crate::api::commit_stream::{self, CommitStream};
use crate::api::node::RaftNode;
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::commitlog::Log;
use crate::network::{ActorTransport, LocalNetwork, PeerConnector};
use crate::replica::{
    EntryValidator, FailureListener, MemberId, MetricsSink, NoopEntryValidator, NoopMetrics, PersistentLocalState,
    RaftLogEntry, RaftMember, Replica, ReplicaConfig, StartupError, TokioScheduler,
};
use crate::snapshot::{InMemorySnapshotStore, SnapshotStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::convert::TryFrom;
use std::sync::Arc;

const MAILBOX_SIZE: usize = 256;

pub struct RaftNodeConfig {
    pub my_member_id: MemberId,
    /// Bootstrap membership. Leave empty for a node that joins an existing cluster.
    pub initial_members: Vec<RaftMember>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
    pub connector: Arc<dyn PeerConnector>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub entry_validator: Box<dyn EntryValidator>,
    pub metrics: Arc<dyn MetricsSink>,
    pub failure_listener: Option<Box<dyn FailureListener>>,
    /// Seeds election jitter. Random when `None`.
    pub rng_seed: Option<u64>,
}

impl RaftNodeConfig {
    /// Config for a node on a `LocalNetwork`, with in-memory snapshots and no validation.
    pub fn local(
        info_logger: slog::Logger,
        my_member_id: MemberId,
        initial_members: Vec<RaftMember>,
        network: &LocalNetwork,
    ) -> Self {
        RaftNodeConfig {
            connector: network.connector(my_member_id.clone()),
            my_member_id,
            initial_members,
            info_logger,
            options: RaftOptions::default(),
            snapshot_store: Arc::new(InMemorySnapshotStore::new()),
            entry_validator: Box::new(NoopEntryValidator),
            metrics: Arc::new(NoopMetrics),
            failure_listener: None,
            rng_seed: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateRaftNodeError {
    #[error("Illegal options: {0}")]
    IllegalOptions(&'static str),

    #[error("Replica failed to start")]
    Startup(#[from] StartupError),
}

/// Starts a replica in its own actor. Must be called from within a tokio runtime.
pub async fn create_raft_node<L, S>(
    config: RaftNodeConfig,
    log: L,
    local_state: S,
) -> Result<(RaftNode, CommitStream), CreateRaftNodeError>
where
    L: Log<RaftLogEntry> + 'static,
    S: PersistentLocalState + 'static,
{
    let logger = config
        .info_logger
        .new(slog::o!("Member" => config.my_member_id.to_string()));
    let options = RaftOptionsValidated::try_from(config.options).map_err(CreateRaftNodeError::IllegalOptions)?;

    let (actor_client, actor_queue_rx) = ActorClient::new(MAILBOX_SIZE);
    let transport = ActorTransport::new(
        logger.clone(),
        config.connector,
        actor_client.weak(),
        options.peer_request_timeout,
    );
    let rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut replica = Replica::new(ReplicaConfig {
        logger: logger.clone(),
        my_member_id: config.my_member_id.clone(),
        initial_members: config.initial_members,
        log,
        local_state,
        snapshot_store: config.snapshot_store,
        transport: Box::new(transport),
        scheduler: Box::new(TokioScheduler::new(actor_client.weak())),
        rng,
        options,
        entry_validator: config.entry_validator,
        metrics: config.metrics,
    })?;

    let (publisher, commit_stream) = commit_stream::create_commit_stream(logger.clone());
    replica.add_commit_listener(Box::new(publisher));
    if let Some(failure_listener) = config.failure_listener {
        replica.add_failure_listener(failure_listener);
    }
    let role_changes = replica.role_change_listener();

    let replica_actor = ReplicaActor::new(logger, actor_queue_rx, replica);
    let event_loop = tokio::spawn(async move {
        replica_actor.run_event_loop().await;
    });

    let node = RaftNode {
        my_member_id: config.my_member_id,
        actor_client,
        role_changes,
        event_loop,
    };
    Ok((node, commit_stream))
}

/// `create_raft_node` for a `LocalNetwork` member. The node is reachable by its peers once this
/// returns.
pub async fn create_local_raft_node<L, S>(
    config: RaftNodeConfig,
    log: L,
    local_state: S,
    network: &LocalNetwork,
) -> Result<(RaftNode, CommitStream), CreateRaftNodeError>
where
    L: Log<RaftLogEntry> + 'static,
    S: PersistentLocalState + 'static,
{
    let (node, commit_stream) = create_raft_node(config, log, local_state).await?;
    network.register(node.my_member_id.clone(), node.actor_client.weak());
    Ok((node, commit_stream))
}
