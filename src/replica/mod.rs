mod callback;
mod configuration;
mod election;
mod errors;
mod listeners;
mod local_state;
mod messages;
mod peers;
mod reads;
mod reconfiguration;
mod replica;
mod replication;
mod timers;
mod transport;
mod write_ahead_log;

pub use callback::Callback;
pub use configuration::Configuration;
pub use election::Role;
pub use election::RoleChange;
pub use election::RoleChangeListener;
pub use errors::AppendError;
pub use errors::FatalError;
pub use errors::PeerCallError;
pub use errors::ReadError;
pub use errors::StartupError;
pub use listeners::AppendListener;
pub use listeners::CommitListener;
pub use listeners::EntryValidator;
pub use listeners::FailureListener;
pub use listeners::MetricsSink;
pub use listeners::NoopEntryValidator;
pub use listeners::NoopMetrics;
pub use listeners::SnapshotReplicationListener;
pub use local_state::PersistentLocalState;
pub use local_state::Term;
pub use local_state::VolatileLocalState;
pub use messages::AppendRequest;
pub use messages::AppendResponse;
pub use messages::ConfigurationResponse;
pub use messages::ConfigureRequest;
pub use messages::ErrorKind;
pub use messages::ForceConfigureRequest;
pub use messages::ForceConfigureResponse;
pub use messages::InstallRequest;
pub use messages::InstallResponse;
pub use messages::JoinRequest;
pub use messages::LeaveRequest;
pub use messages::MessageValidationError;
pub use messages::RaftError;
pub use messages::RaftRequest;
pub use messages::RaftResponse;
pub use messages::ReconfigureRequest;
pub use messages::ResponseStatus;
pub use messages::TransferRequest;
pub use messages::TransferResponse;
pub use messages::VoteRequest;
pub use messages::VoteResponse;
pub use peers::MemberId;
pub use peers::MemberType;
pub use peers::RaftMember;
pub use reads::ReadConsistency;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replication::AppendInput;
pub use timers::Scheduler;
pub use timers::TimerCancellation;
pub use timers::TimerEvent;
pub use timers::TimerHandle;
pub use timers::TimerKind;
pub use transport::OutboundRequest;
pub use transport::RaftTransport;
pub use transport::ReplyFromPeer;
pub use transport::RequestDescriptor;
pub use write_ahead_log::AdministrativeEntry;
pub use write_ahead_log::ApplicationEntry;
pub use write_ahead_log::EntryPayload;
pub use write_ahead_log::RaftLogEntry;

pub(crate) use timers::TokioScheduler;
