//! This mod is meant to hold most of the code for the library's client-facing API.
mod commit_stream;
mod node;
mod options;
mod wiring;

pub use commit_stream::CommitStream;
pub use commit_stream::CommittedEntry;
pub use node::AppendHandle;
pub use node::RaftNode;
pub use options::PriorityElectionOptions;
pub use options::RaftOptions;
pub use options::RaftOptionsValidated;
pub use wiring::create_local_raft_node;
pub use wiring::create_raft_node;
pub use wiring::CreateRaftNodeError;
pub use wiring::RaftNodeConfig;
