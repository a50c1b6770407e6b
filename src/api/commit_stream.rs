use crate::commitlog::Index;
use crate::replica::{CommitListener, RaftLogEntry};
use tokio::sync::mpsc;

pub(crate) fn create_commit_stream(logger: slog::Logger) -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = CommitStreamPublisher { logger, sender: tx };
    let stream = CommitStream { receiver: rx };

    (publisher, stream)
}

/// Commit listener that forwards into a `CommitStream`.
pub(crate) struct CommitStreamPublisher {
    logger: slog::Logger,
    sender: mpsc::UnboundedSender<CommittedEntry>,
}

impl CommitListener for CommitStreamPublisher {
    fn on_commit(&mut self, index: Index, entry: Option<&RaftLogEntry>) {
        let committed = CommittedEntry {
            index,
            entry: entry.cloned(),
        };
        if self.sender.send(committed).is_err() {
            slog::debug!(self.logger, "CommitStream has disconnected");
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommittedEntry {
    pub index: Index,
    /// `None` for indexes covered by an installed snapshot. Load the snapshot instead.
    pub entry: Option<RaftLogEntry>,
}

/// Every committed index, in order, for the application to apply.
pub struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
}

impl CommitStream {
    /// next returns the next committed entry to be applied to your application's state machine.
    /// `None` once the node has shut down.
    pub async fn next(&mut self) -> Option<CommittedEntry> {
        self.receiver.recv().await
    }
}
