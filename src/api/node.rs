use crate::actor::{ActorClient, ActorStopped, ReplicaStatus};
use crate::commitlog::Index;
use crate::replica::{
    AppendError, AppendInput, AppendListener, CommitListener, ConfigurationResponse, ErrorKind, ForceConfigureRequest,
    ForceConfigureResponse, JoinRequest, LeaveRequest, MemberId, RaftMember, RaftRequest, RaftResponse,
    ReadConsistency, ReadError, ReconfigureRequest, ResponseStatus, RoleChangeListener, TransferRequest,
    TransferResponse,
};
use crate::snapshot::{SnapshotError, SnapshotMetadata};
use bytes::Bytes;
use std::io;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to a running raft node. Dropping it (and every clone of the network's view of it) stops
/// the node.
pub struct RaftNode {
    pub(crate) my_member_id: MemberId,
    pub(crate) actor_client: ActorClient,
    pub(crate) role_changes: RoleChangeListener,
    pub(crate) event_loop: JoinHandle<()>,
}

/// An append accepted by the leader's log, waiting to be committed.
#[derive(Debug)]
pub struct AppendHandle {
    index: Index,
    committed: oneshot::Receiver<Result<Index, AppendError>>,
}

impl AppendHandle {
    pub fn index(&self) -> Index {
        self.index
    }

    /// Resolves once the entry is committed, or with `LeadershipLost` if it may never be.
    pub async fn committed(self) -> Result<Index, AppendError> {
        match self.committed.await {
            Ok(result) => result,
            Err(_) => Err(AppendError::Inactive),
        }
    }
}

struct ChannelAppendListener {
    written: Option<oneshot::Sender<Result<Index, AppendError>>>,
    committed: Option<oneshot::Sender<Result<Index, AppendError>>>,
}

impl AppendListener for ChannelAppendListener {
    fn on_write(&mut self, index: Index) {
        if let Some(written) = self.written.take() {
            let _ = written.send(Ok(index));
        }
    }

    fn on_write_error(&mut self, error: AppendError) {
        if let Some(written) = self.written.take() {
            let _ = written.send(Err(error));
        }
    }

    fn on_commit(&mut self, index: Index) {
        if let Some(committed) = self.committed.take() {
            let _ = committed.send(Ok(index));
        }
    }

    fn on_commit_error(&mut self, _index: Index, error: AppendError) {
        if let Some(committed) = self.committed.take() {
            let _ = committed.send(Err(error));
        }
    }
}

impl RaftNode {
    pub fn my_member_id(&self) -> &MemberId {
        &self.my_member_id
    }

    /// Waits for the leader's write, not for the commit. Use the handle for that.
    pub async fn append(&self, input: AppendInput) -> Result<AppendHandle, AppendError> {
        let (written_tx, written_rx) = oneshot::channel();
        let (committed_tx, committed_rx) = oneshot::channel();
        let listener = ChannelAppendListener {
            written: Some(written_tx),
            committed: Some(committed_tx),
        };

        self.actor_client
            .append(input, Box::new(listener))
            .await
            .map_err(|_| AppendError::Inactive)?;
        let index = written_rx.await.map_err(|_| AppendError::Inactive)??;

        Ok(AppendHandle {
            index,
            committed: committed_rx,
        })
    }

    pub async fn read(&self, consistency: ReadConsistency) -> Result<Index, ReadError> {
        self.actor_client
            .read(consistency)
            .await
            .map_err(|_| ReadError::Inactive)?
    }

    pub async fn join(&self, member: RaftMember) -> ConfigurationResponse {
        match self.request(RaftRequest::Join(JoinRequest { member })).await {
            Some(RaftResponse::Join(response)) => response,
            _ => ConfigurationResponse::error(ResponseStatus::error(ErrorKind::Unavailable)),
        }
    }

    pub async fn leave(&self, member: MemberId) -> ConfigurationResponse {
        match self.request(RaftRequest::Leave(LeaveRequest { member })).await {
            Some(RaftResponse::Leave(response)) => response,
            _ => ConfigurationResponse::error(ResponseStatus::error(ErrorKind::Unavailable)),
        }
    }

    pub async fn reconfigure(&self, request: ReconfigureRequest) -> ConfigurationResponse {
        match self.request(RaftRequest::Reconfigure(request)).await {
            Some(RaftResponse::Reconfigure(response)) => response,
            _ => ConfigurationResponse::error(ResponseStatus::error(ErrorKind::Unavailable)),
        }
    }

    pub async fn transfer_leadership(&self, member: MemberId) -> TransferResponse {
        match self.request(RaftRequest::Transfer(TransferRequest { member })).await {
            Some(RaftResponse::Transfer(response)) => response,
            _ => TransferResponse {
                status: ResponseStatus::error(ErrorKind::Unavailable),
            },
        }
    }

    /// Operator override for a cluster that lost its majority. Can lose committed entries.
    pub async fn force_configure(&self, request: ForceConfigureRequest) -> ForceConfigureResponse {
        let term = request.term;
        match self.request(RaftRequest::ForceConfigure(request)).await {
            Some(RaftResponse::ForceConfigure(response)) => response,
            _ => ForceConfigureResponse {
                status: ResponseStatus::error(ErrorKind::Unavailable),
                index: Index::ZERO,
                term,
            },
        }
    }

    /// Raw request entry point, for servers that receive requests from peers.
    pub async fn handle_request(&self, request: RaftRequest) -> Result<RaftResponse, ActorStopped> {
        self.actor_client.request(request).await
    }

    pub async fn take_snapshot(&self, index: Index, data: Bytes) -> Result<SnapshotMetadata, SnapshotError> {
        match self.actor_client.take_snapshot(index, data).await {
            Ok(result) => result,
            Err(e) => Err(SnapshotError::Io(io::Error::new(io::ErrorKind::BrokenPipe, e))),
        }
    }

    pub async fn compact(&self, index: Index) -> io::Result<Index> {
        match self.actor_client.compact(index).await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::BrokenPipe, e)),
        }
    }

    pub async fn status(&self) -> Result<ReplicaStatus, ActorStopped> {
        self.actor_client.status().await
    }

    /// Listeners added here see commits from the current commit index on, not the history.
    pub async fn add_commit_listener(&self, listener: Box<dyn CommitListener>) -> Result<(), ActorStopped> {
        self.actor_client.add_commit_listener(listener).await
    }

    pub fn role_changes(&self) -> RoleChangeListener {
        self.role_changes.clone()
    }

    /// Stops the node and waits for its event loop to exit.
    pub async fn shutdown(self) {
        let RaftNode {
            actor_client,
            event_loop,
            ..
        } = self;
        drop(actor_client);
        let _ = event_loop.await;
    }

    async fn request(&self, request: RaftRequest) -> Option<RaftResponse> {
        self.actor_client.request(request).await.ok()
    }
}
