mod local;
mod peer_client;

pub use local::LocalNetwork;
pub use peer_client::PeerClient;
pub use peer_client::PeerConnector;

pub(crate) use peer_client::ActorTransport;
