use crate::commitlog::{Index, Log};
use crate::replica::{
    AppendInput, AppendListener, Callback, CommitListener, Configuration, PersistentLocalState, RaftLogEntry,
    RaftRequest, RaftResponse, ReadConsistency, ReadError, ReplyFromPeer, Replica, RoleChange, TimerEvent,
};
use crate::snapshot::{SnapshotError, SnapshotMetadata};
use bytes::Bytes;
use std::fmt;
use std::io;
use tokio::sync::mpsc;

/// Everything that reaches a replica goes through its mailbox, one event at a time.
pub(crate) enum Event {
    Request(RaftRequest, Callback<RaftResponse>),
    PeerReply(ReplyFromPeer),
    Timer(TimerEvent),
    Append(AppendInput, Box<dyn AppendListener>),
    Read(ReadConsistency, Callback<Result<Index, ReadError>>),
    TakeSnapshot(Index, Bytes, Callback<Result<SnapshotMetadata, SnapshotError>>),
    Compact(Index, Callback<io::Result<Index>>),
    AddCommitListener(Box<dyn CommitListener>),
    Status(Callback<ReplicaStatus>),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Request(request, _) => write!(f, "Request({})", request.name()),
            Event::PeerReply(reply) => write!(f, "PeerReply({:?})", reply.descriptor),
            Event::Timer(event) => write!(f, "Timer({:?})", event),
            Event::Append(input, _) => write!(f, "Append({:?})", input),
            Event::Read(consistency, _) => write!(f, "Read({:?})", consistency),
            Event::TakeSnapshot(index, _, _) => write!(f, "TakeSnapshot({:?})", index),
            Event::Compact(index, _) => write!(f, "Compact({:?})", index),
            Event::AddCommitListener(_) => f.write_str("AddCommitListener"),
            Event::Status(_) => f.write_str("Status"),
        }
    }
}

/// Point-in-time view of a replica, for callers outside the actor.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaStatus {
    pub role: RoleChange,
    pub commit_index: Index,
    pub last_applied: Index,
    pub last_log_index: Index,
    pub snapshot_index: Index,
    pub configuration: Option<Configuration>,
}

#[derive(Debug, thiserror::Error)]
#[error("Replica actor has stopped")]
pub struct ActorStopped;

/// Strong handle to the actor's mailbox. The actor runs until every strong handle is dropped.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// Handle for the actor's own helpers (timers, peer calls). Doesn't keep the actor alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn request(&self, request: RaftRequest) -> Result<RaftResponse, ActorStopped> {
        let (callback, rx) = Callback::new();
        self.send(Event::Request(request, callback)).await?;
        rx.await.map_err(|_| ActorStopped)
    }

    pub(crate) async fn append(&self, input: AppendInput, listener: Box<dyn AppendListener>) -> Result<(), ActorStopped> {
        self.send(Event::Append(input, listener)).await
    }

    pub(crate) async fn read(&self, consistency: ReadConsistency) -> Result<Result<Index, ReadError>, ActorStopped> {
        let (callback, rx) = Callback::new();
        self.send(Event::Read(consistency, callback)).await?;
        rx.await.map_err(|_| ActorStopped)
    }

    pub(crate) async fn take_snapshot(
        &self,
        index: Index,
        data: Bytes,
    ) -> Result<Result<SnapshotMetadata, SnapshotError>, ActorStopped> {
        let (callback, rx) = Callback::new();
        self.send(Event::TakeSnapshot(index, data, callback)).await?;
        rx.await.map_err(|_| ActorStopped)
    }

    pub(crate) async fn compact(&self, index: Index) -> Result<io::Result<Index>, ActorStopped> {
        let (callback, rx) = Callback::new();
        self.send(Event::Compact(index, callback)).await?;
        rx.await.map_err(|_| ActorStopped)
    }

    pub(crate) async fn add_commit_listener(&self, listener: Box<dyn CommitListener>) -> Result<(), ActorStopped> {
        self.send(Event::AddCommitListener(listener)).await
    }

    pub(crate) async fn status(&self) -> Result<ReplicaStatus, ActorStopped> {
        let (callback, rx) = Callback::new();
        self.send(Event::Status(callback)).await?;
        rx.await.map_err(|_| ActorStopped)
    }

    async fn send(&self, event: Event) -> Result<(), ActorStopped> {
        self.sender.send(event).await.map_err(|_| ActorStopped)
    }
}

impl WeakActorClient {
    pub(crate) fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(crate) async fn timer(&self, event: TimerEvent) {
        self.send(Event::Timer(event)).await;
    }

    pub(crate) async fn peer_reply(&self, reply: ReplyFromPeer) {
        self.send(Event::PeerReply(reply)).await;
    }

    async fn send(&self, event: Event) {
        // Actor is gone, nobody cares anymore.
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(event).await;
        }
    }
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica<L, S>,
}

impl<L, S> ReplicaActor<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica<L, S>) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    /// Runs until every strong client is dropped, then hands back the log and local state.
    pub(crate) async fn run_event_loop(mut self) -> (L, S) {
        slog::info!(self.logger, "Replica event loop started");
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }

        slog::info!(self.logger, "Replica event loop exiting");
        self.replica.shutdown()
    }

    // This must NOT be async. Any long running work must be spawned on another task and come back
    // as an event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Request(request, callback) => self.replica.handle_request(request, callback),
            Event::PeerReply(reply) => self.replica.handle_peer_reply(reply),
            Event::Timer(event) => self.replica.handle_timer(event),
            Event::Append(input, listener) => self.replica.append(input, listener),
            Event::Read(consistency, callback) => self.replica.read(consistency, callback),
            Event::TakeSnapshot(index, data, callback) => callback.send(self.replica.take_snapshot(index, data)),
            Event::Compact(index, callback) => callback.send(self.replica.compact(index)),
            Event::AddCommitListener(listener) => self.replica.add_commit_listener(listener),
            Event::Status(callback) => callback.send(self.status()),
        }
    }

    fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            role: self.replica.role_change_listener().current(),
            commit_index: self.replica.commit_index(),
            last_applied: self.replica.last_applied(),
            last_log_index: self.replica.last_log_index(),
            snapshot_index: self.replica.snapshot_index(),
            configuration: self.replica.configuration().cloned(),
        }
    }
}
