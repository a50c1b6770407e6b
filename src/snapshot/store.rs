use crate::commitlog::Index;
use crate::replica::Term;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(index: Index, term: Term) -> Self {
        SnapshotId(format!("{}-{}", index.as_u64(), term.as_u64()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque chunk identifier. Only the store that produced it knows how it's ordered.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ChunkId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub id: SnapshotId,
    pub index: Index,
    pub term: Term,
    pub timestamp: DateTime<Utc>,
}

impl SnapshotMetadata {
    pub fn new(index: Index, term: Term) -> Self {
        SnapshotMetadata {
            id: SnapshotId::new(index, term),
            index,
            term,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotChunk {
    pub snapshot_id: SnapshotId,
    pub chunk_id: ChunkId,
    pub total_count: u32,
    pub checksum: u32,
    pub data: Bytes,
}

impl SnapshotChunk {
    pub fn new(snapshot_id: SnapshotId, chunk_id: ChunkId, total_count: u32, data: Bytes) -> Self {
        let checksum = crc32fast::hash(&data);
        SnapshotChunk {
            snapshot_id,
            chunk_id,
            total_count,
            checksum,
            data,
        }
    }

    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }
}

/// SnapshotStore holds the latest persisted snapshot and hands out writers for snapshots being
/// received from a leader.
///
/// It is shared between the raft context and anything that reads snapshots in the background, so
/// every method takes `&self`. A snapshot only becomes visible through `current_snapshot()` and
/// `new_chunk_reader()` once it has been fully persisted.
pub trait SnapshotStore: Send + Sync {
    fn current_snapshot(&self) -> Option<SnapshotMetadata>;

    fn new_receiving_snapshot(&self, metadata: SnapshotMetadata) -> Result<Box<dyn ReceivingSnapshot>, SnapshotError>;

    fn new_chunk_reader(&self, metadata: &SnapshotMetadata) -> Result<Box<dyn SnapshotChunkReader>, SnapshotError>;

    /// Persist a snapshot taken from local state.
    fn take_snapshot(&self, metadata: SnapshotMetadata, data: Bytes) -> Result<SnapshotMetadata, SnapshotError>;

    fn current_snapshot_index(&self) -> Index {
        self.current_snapshot().map(|s| s.index).unwrap_or(Index::ZERO)
    }
}

pub trait ReceivingSnapshot: Send {
    fn metadata(&self) -> &SnapshotMetadata;

    /// Writes a chunk. Fails if the checksum doesn't match or the chunk belongs to another snapshot.
    fn apply(&mut self, chunk: SnapshotChunk) -> Result<(), SnapshotError>;

    /// Verifies all chunks arrived and atomically publishes the snapshot as current.
    fn persist(self: Box<Self>) -> Result<SnapshotMetadata, SnapshotError>;

    fn abort(self: Box<Self>);
}

pub trait SnapshotChunkReader: Send {
    /// Rewind to the first chunk.
    fn reset(&mut self);

    /// Position the reader so the next call to `next()` returns `chunk_id`.
    fn seek(&mut self, chunk_id: &ChunkId) -> Result<(), SnapshotError>;

    fn peek_next_id(&self) -> Option<ChunkId>;

    fn next(&mut self) -> Option<SnapshotChunk>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Checksum mismatch for chunk {0}")]
    ChecksumMismatch(ChunkId),

    #[error("Chunk belongs to snapshot {actual}, expected {expected}")]
    UnexpectedSnapshot { expected: SnapshotId, actual: SnapshotId },

    #[error("Received {received} of {expected} chunks")]
    MissingChunks { expected: u32, received: u32 },

    #[error("Snapshot {0} does not exist")]
    UnknownSnapshot(SnapshotId),

    #[error("Chunk {0} does not exist")]
    UnknownChunk(ChunkId),

    #[error("A snapshot at index {0} or later already exists")]
    AlreadyExists(Index),

    #[error("Snapshot index {requested} is not committed, commit index is {commit_index}")]
    NotCommitted { requested: Index, commit_index: Index },

    #[error("Index {0} is not available in the log")]
    EntryUnavailable(Index),

    #[error("Snapshot store lock poisoned")]
    LockPoisoned,

    #[error("Snapshot IO failure")]
    Io(#[from] std::io::Error),
}
