mod actor;
mod api;
mod commitlog;
mod network;
mod replica;
mod simulation;
mod snapshot;

pub use actor::ActorStopped;
pub use actor::ReplicaStatus;
pub use api::create_local_raft_node;
pub use api::create_raft_node;
pub use api::AppendHandle;
pub use api::CommitStream;
pub use api::CommittedEntry;
pub use api::CreateRaftNodeError;
pub use api::PriorityElectionOptions;
pub use api::RaftNode;
pub use api::RaftNodeConfig;
pub use api::RaftOptions;
pub use api::RaftOptionsValidated;
pub use commitlog::Entry;
pub use commitlog::InMemoryLog;
pub use commitlog::Index;
pub use commitlog::Log;
pub use network::LocalNetwork;
pub use network::PeerClient;
pub use network::PeerConnector;
pub use replica::AdministrativeEntry;
pub use replica::AppendError;
pub use replica::AppendInput;
pub use replica::AppendListener;
pub use replica::AppendRequest;
pub use replica::AppendResponse;
pub use replica::ApplicationEntry;
pub use replica::Callback;
pub use replica::CommitListener;
pub use replica::Configuration;
pub use replica::ConfigurationResponse;
pub use replica::ConfigureRequest;
pub use replica::EntryPayload;
pub use replica::EntryValidator;
pub use replica::ErrorKind;
pub use replica::FailureListener;
pub use replica::FatalError;
pub use replica::ForceConfigureRequest;
pub use replica::ForceConfigureResponse;
pub use replica::InstallRequest;
pub use replica::InstallResponse;
pub use replica::JoinRequest;
pub use replica::LeaveRequest;
pub use replica::MemberId;
pub use replica::MemberType;
pub use replica::MessageValidationError;
pub use replica::MetricsSink;
pub use replica::NoopEntryValidator;
pub use replica::NoopMetrics;
pub use replica::OutboundRequest;
pub use replica::PeerCallError;
pub use replica::PersistentLocalState;
pub use replica::RaftError;
pub use replica::RaftLogEntry;
pub use replica::RaftMember;
pub use replica::RaftRequest;
pub use replica::RaftResponse;
pub use replica::RaftTransport;
pub use replica::ReadConsistency;
pub use replica::ReadError;
pub use replica::ReconfigureRequest;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replica::ReplyFromPeer;
pub use replica::RequestDescriptor;
pub use replica::ResponseStatus;
pub use replica::Role;
pub use replica::RoleChange;
pub use replica::RoleChangeListener;
pub use replica::Scheduler;
pub use replica::SnapshotReplicationListener;
pub use replica::StartupError;
pub use replica::Term;
pub use replica::TimerCancellation;
pub use replica::TimerEvent;
pub use replica::TimerHandle;
pub use replica::TimerKind;
pub use replica::TransferRequest;
pub use replica::TransferResponse;
pub use replica::VolatileLocalState;
pub use replica::VoteRequest;
pub use replica::VoteResponse;
pub use simulation::AppendEvents;
pub use simulation::AppendTracker;
pub use simulation::SimulatedCluster;
pub use simulation::SimulatedReplica;
pub use simulation::SimulationOptions;
pub use snapshot::ChunkId;
pub use snapshot::InMemorySnapshotStore;
pub use snapshot::ReceivingSnapshot;
pub use snapshot::SnapshotChunk;
pub use snapshot::SnapshotChunkReader;
pub use snapshot::SnapshotError;
pub use snapshot::SnapshotId;
pub use snapshot::SnapshotMetadata;
pub use snapshot::SnapshotStore;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
