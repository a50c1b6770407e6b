use crate::actor::WeakActorClient;
use crate::replica::{MemberId, OutboundRequest, PeerCallError, RaftRequest, RaftResponse, RaftTransport, ReplyFromPeer};
use std::sync::Arc;
use tokio::time::Duration;

/// Client side of a connection to one peer.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    async fn call(&self, request: RaftRequest) -> Result<RaftResponse, PeerCallError>;
}

/// Finds a client for a member. Members come and go with reconfiguration, so connections are
/// looked up per request.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, member: &MemberId) -> Option<Arc<dyn PeerClient>>;
}

/// Transport for replicas running in the actor. Each request is its own tokio task that posts the
/// reply (or the failure) back to the actor's queue.
pub(crate) struct ActorTransport {
    logger: slog::Logger,
    connector: Arc<dyn PeerConnector>,
    actor_client: WeakActorClient,
    request_timeout: Duration,
}

impl ActorTransport {
    pub(crate) fn new(
        logger: slog::Logger,
        connector: Arc<dyn PeerConnector>,
        actor_client: WeakActorClient,
        request_timeout: Duration,
    ) -> Self {
        ActorTransport {
            logger,
            connector,
            actor_client,
            request_timeout,
        }
    }
}

impl RaftTransport for ActorTransport {
    fn send(&mut self, request: OutboundRequest) {
        let OutboundRequest { descriptor, request } = request;
        let client = self.connector.connect(&descriptor.peer_id);
        if client.is_none() {
            slog::debug!(self.logger, "No connection to {}", descriptor.peer_id);
        }

        let actor_client = self.actor_client.clone();
        let request_timeout = self.request_timeout;
        tokio::task::spawn(async move {
            let result = match client {
                Some(client) => match tokio::time::timeout(request_timeout, client.call(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(PeerCallError::Timeout),
                },
                None => Err(PeerCallError::Unreachable(format!("Unknown member {}", descriptor.peer_id))),
            };

            actor_client.peer_reply(ReplyFromPeer { descriptor, result }).await;
        });
    }
}
