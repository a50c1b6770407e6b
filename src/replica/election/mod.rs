mod election_timer;
mod role;
mod role_change;
mod voting;

pub use role::Role;
pub use role_change::RoleChange;
pub use role_change::RoleChangeListener;

pub(crate) use election_timer::ElectionTimer;
pub(crate) use role::CandidateState;
pub(crate) use role::FollowerState;
pub(crate) use role::RoleState;
pub(crate) use role_change::channel;
pub(crate) use role_change::RoleChangeNotifier;
