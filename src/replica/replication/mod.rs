//! Log shipping. The leader half lives in `leader`/`appender`, the follower half in `follower`
//! and `install`.

mod appender;
mod follower;
mod install;
mod leader;
mod leader_state;
mod peer_state;

pub use appender::AppendInput;

pub(crate) use install::PendingSnapshot;
pub(crate) use leader_state::get_cluster_commit_index;
pub(crate) use leader_state::ConfigurationChange;
pub(crate) use leader_state::LeaderState;
pub(crate) use leader_state::PendingConfiguration;
pub(crate) use leader_state::PendingRead;
pub(crate) use leader_state::PendingTransfer;
pub(crate) use peer_state::InFlightKind;
pub(crate) use peer_state::InstallCursor;
pub(crate) use peer_state::PeerState;
