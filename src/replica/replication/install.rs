use crate::commitlog::Log;
use crate::replica::errors::FatalError;
use crate::replica::local_state::PersistentLocalState;
use crate::replica::messages::{ErrorKind, InstallRequest, InstallResponse, ResponseStatus};
use crate::replica::replica::{Replica, TermCheck};
use crate::replica::write_ahead_log::RaftLogEntry;
use crate::snapshot::{ChunkId, ReceivingSnapshot, SnapshotChunk, SnapshotMetadata};

/// A snapshot being received from the leader, one chunk at a time.
pub(crate) struct PendingSnapshot {
    snapshot: Box<dyn ReceivingSnapshot>,
    last_chunk_id: Option<ChunkId>,
    next_chunk_id: Option<ChunkId>,
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    pub(crate) fn handle_install(&mut self, request: InstallRequest) -> Result<InstallResponse, FatalError> {
        if let TermCheck::Stale(term) = self.observe_term(request.current_term)? {
            return Ok(InstallResponse {
                status: ResponseStatus::error_with_message(ErrorKind::IllegalMemberState, "Stale term"),
                term,
            });
        }

        if self.role.role().is_leader() {
            return Ok(InstallResponse {
                status: ResponseStatus::error(ErrorKind::IllegalMemberState),
                term: self.local_state.current_term(),
            });
        }

        self.accept_leader(&request.leader);
        let status = self.install_chunk(request)?;

        Ok(InstallResponse {
            status,
            term: self.local_state.current_term(),
        })
    }

    fn install_chunk(&mut self, request: InstallRequest) -> Result<ResponseStatus, FatalError> {
        let logger = self.logger.new(slog::o!(
            "Snapshot" => request.snapshot_id.to_string(),
            "Chunk" => request.chunk_id.to_string()
        ));

        let superseded = self
            .receiving_snapshot
            .as_ref()
            .map(|pending| pending.snapshot.metadata().id != request.snapshot_id)
            .unwrap_or(false);
        if superseded {
            slog::info!(logger, "Leader moved on to another snapshot");
            self.abort_receiving_snapshot();
        }

        if let Some(pending) = &self.receiving_snapshot {
            if pending.last_chunk_id.as_ref() == Some(&request.chunk_id) {
                slog::debug!(logger, "Duplicate chunk");
                return Ok(ResponseStatus::Ok);
            }

            if request.initial {
                slog::info!(logger, "Leader restarted the transfer");
                self.abort_receiving_snapshot();
            } else if pending.next_chunk_id.as_ref() != Some(&request.chunk_id) {
                slog::warn!(logger, "Out of order chunk, expected {:?}", pending.next_chunk_id);
                self.abort_receiving_snapshot();
                return Ok(ResponseStatus::error_with_message(
                    ErrorKind::ProtocolError,
                    "Unexpected snapshot chunk",
                ));
            }
        }

        if self.log.commit_index() > request.index {
            slog::debug!(logger, "Already committed past snapshot {:?}", request.index);
            return Ok(ResponseStatus::Ok);
        }

        if self.log.snapshot_index() >= request.index {
            self.abort_receiving_snapshot();
            return Ok(ResponseStatus::Ok);
        }

        if !request.complete && request.next_chunk_id.is_none() {
            self.abort_receiving_snapshot();
            return Ok(ResponseStatus::error_with_message(
                ErrorKind::ProtocolError,
                "Incomplete chunk without a next chunk",
            ));
        }

        if self.receiving_snapshot.is_none() {
            if !request.initial {
                return Ok(ResponseStatus::error_with_message(
                    ErrorKind::ProtocolError,
                    "No snapshot transfer in progress",
                ));
            }

            let metadata = SnapshotMetadata {
                id: request.snapshot_id.clone(),
                index: request.index,
                term: request.term,
                timestamp: request.timestamp,
            };
            let snapshot = match self.snapshot_store.new_receiving_snapshot(metadata) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    slog::warn!(logger, "Can't receive snapshot: {}", e);
                    return Ok(ResponseStatus::error_with_message(ErrorKind::Unavailable, e.to_string()));
                }
            };

            slog::info!(logger, "Receiving snapshot at {:?}", request.index);
            self.receiving_snapshot = Some(PendingSnapshot {
                snapshot,
                last_chunk_id: None,
                next_chunk_id: None,
            });
            for listener in self.snapshot_replication_listeners.iter_mut() {
                listener.on_snapshot_replication_started();
            }
        }

        let chunk = SnapshotChunk {
            snapshot_id: request.snapshot_id,
            chunk_id: request.chunk_id.clone(),
            total_count: request.total_count,
            checksum: request.checksum,
            data: request.data,
        };
        let applied = match self.receiving_snapshot.as_mut() {
            Some(pending) => match pending.snapshot.apply(chunk) {
                Ok(()) => {
                    pending.last_chunk_id = Some(request.chunk_id);
                    pending.next_chunk_id = request.next_chunk_id;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            None => return Ok(ResponseStatus::error(ErrorKind::ProtocolError)),
        };
        if let Err(e) = applied {
            slog::warn!(logger, "Failed to apply chunk: {}", e);
            self.abort_receiving_snapshot();
            return Ok(ResponseStatus::error_with_message(ErrorKind::ProtocolError, e.to_string()));
        }

        if request.complete {
            return self.complete_snapshot_install(&logger);
        }

        Ok(ResponseStatus::Ok)
    }

    fn complete_snapshot_install(&mut self, logger: &slog::Logger) -> Result<ResponseStatus, FatalError> {
        let pending = match self.receiving_snapshot.take() {
            Some(pending) => pending,
            None => return Ok(ResponseStatus::error(ErrorKind::ProtocolError)),
        };
        let (index, term) = {
            let metadata = pending.snapshot.metadata();
            (metadata.index, metadata.term)
        };
        let (previous_index, previous_term) = self.log.snapshot();

        // Log goes first. Crashing after this leaves an empty log behind the old snapshot, never
        // a log that disagrees with the new one.
        self.log
            .reset_to_snapshot(index, term)
            .map_err(FatalError::LogIo)?;

        let current_term = self.local_state.current_term();
        if let Err(e) = pending.snapshot.persist() {
            slog::warn!(logger, "Failed to persist snapshot, rolling back: {}", e);
            self.log
                .reset_to_snapshot(previous_index, previous_term)
                .map_err(FatalError::LogIo)?;
            for listener in self.snapshot_replication_listeners.iter_mut() {
                listener.on_snapshot_replication_completed(current_term);
            }
            return Ok(ResponseStatus::error_with_message(ErrorKind::Unavailable, e.to_string()));
        }

        slog::info!(logger, "Installed snapshot at {:?}", index);
        self.cluster.truncate(index.plus(1));
        self.log.ratchet_fwd_commit_index(index);
        for listener in self.snapshot_replication_listeners.iter_mut() {
            listener.on_snapshot_replication_completed(current_term);
        }
        self.apply_commits()?;

        Ok(ResponseStatus::Ok)
    }

    /// Drop the snapshot being received, if any. Its chunks are thrown away.
    pub(crate) fn abort_receiving_snapshot(&mut self) {
        if let Some(pending) = self.receiving_snapshot.take() {
            slog::info!(
                self.logger,
                "Aborting snapshot {} transfer",
                pending.snapshot.metadata().id
            );
            pending.snapshot.abort();

            let term = self.local_state.current_term();
            for listener in self.snapshot_replication_listeners.iter_mut() {
                listener.on_snapshot_replication_completed(term);
            }
        }
    }
}
