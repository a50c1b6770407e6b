use crate::replica::errors::PeerCallError;
use crate::replica::local_state::Term;
use crate::replica::messages::{RaftRequest, RaftResponse};
use crate::replica::peers::MemberId;

/// Identifies an outbound request so its reply can be matched up, or discarded if stale.
///
/// `seq_no` is 0 for vote requests. Replication requests use the leader's per-peer sequence
/// numbers, which start at 1 in every term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub peer_id: MemberId,
    pub term: Term,
    pub seq_no: u64,
}

#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub descriptor: RequestDescriptor,
    pub request: RaftRequest,
}

#[derive(Clone, Debug)]
pub struct ReplyFromPeer {
    pub descriptor: RequestDescriptor,
    pub result: Result<RaftResponse, PeerCallError>,
}

/// Outbound half of the network, as seen by the replica.
///
/// `send` must not block. Every request sent must eventually produce exactly one
/// `ReplyFromPeer` fed back through `Replica::handle_peer_reply`, with a `PeerCallError` if the
/// peer didn't answer in time. The leader tracks one outstanding request per peer, so a reply
/// that never comes stalls replication to that peer until the request expires.
pub trait RaftTransport: Send {
    fn send(&mut self, request: OutboundRequest);
}
