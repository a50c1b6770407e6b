use crate::snapshot::{
    ChunkId, ReceivingSnapshot, SnapshotChunk, SnapshotChunkReader, SnapshotError, SnapshotMetadata, SnapshotStore,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

struct StoredSnapshot {
    metadata: SnapshotMetadata,
    chunks: Vec<SnapshotChunk>,
}

#[derive(Default)]
struct Inner {
    current: Option<Arc<StoredSnapshot>>,
}

/// In-memory snapshot store. Readers hold an `Arc` to a fully persisted snapshot, so a snapshot
/// published while they read doesn't affect them.
#[derive(Clone)]
pub struct InMemorySnapshotStore {
    inner: Arc<RwLock<Inner>>,
    chunk_size: usize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        InMemorySnapshotStore {
            inner: Arc::new(RwLock::new(Inner::default())),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Concatenated chunk data of the current snapshot.
    pub fn current_snapshot_data(&self) -> Option<Bytes> {
        let current = self.read_current()?;
        let mut data = Vec::new();
        for chunk in current.chunks.iter() {
            data.extend_from_slice(&chunk.data);
        }

        Some(Bytes::from(data))
    }

    // `current` is only ever swapped whole, so a poisoned lock still guards a published snapshot.
    fn read_current(&self) -> Option<Arc<StoredSnapshot>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .current
            .clone()
    }

    fn publish(&self, snapshot: StoredSnapshot) -> Result<SnapshotMetadata, SnapshotError> {
        let mut inner = self.inner.write().map_err(|_| SnapshotError::LockPoisoned)?;
        if let Some(current) = inner.current.as_ref() {
            if current.metadata.index >= snapshot.metadata.index {
                return Err(SnapshotError::AlreadyExists(current.metadata.index));
            }
        }

        let metadata = snapshot.metadata.clone();
        inner.current = Some(Arc::new(snapshot));
        Ok(metadata)
    }

    fn split_into_chunks(&self, metadata: &SnapshotMetadata, data: Bytes) -> Vec<SnapshotChunk> {
        let mut pieces = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = std::cmp::min(offset + self.chunk_size, data.len());
            pieces.push(data.slice(offset..end));
            offset = end;
        }
        // An empty snapshot is still one (empty) chunk.
        if pieces.is_empty() {
            pieces.push(Bytes::new());
        }

        let total_count = pieces.len() as u32;
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                SnapshotChunk::new(
                    metadata.id.clone(),
                    ChunkId::new(format!("{:08}", i)),
                    total_count,
                    piece,
                )
            })
            .collect()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn current_snapshot(&self) -> Option<SnapshotMetadata> {
        self.read_current().map(|s| s.metadata.clone())
    }

    fn new_receiving_snapshot(&self, metadata: SnapshotMetadata) -> Result<Box<dyn ReceivingSnapshot>, SnapshotError> {
        if let Some(current) = self.current_snapshot() {
            if current.index >= metadata.index {
                return Err(SnapshotError::AlreadyExists(current.index));
            }
        }

        Ok(Box::new(InMemoryReceivingSnapshot {
            store: self.clone(),
            metadata,
            chunks: BTreeMap::new(),
            total_count: None,
        }))
    }

    fn new_chunk_reader(&self, metadata: &SnapshotMetadata) -> Result<Box<dyn SnapshotChunkReader>, SnapshotError> {
        match self.read_current() {
            Some(current) if current.metadata.id == metadata.id => Ok(Box::new(InMemoryChunkReader {
                snapshot: current,
                position: 0,
            })),
            _ => Err(SnapshotError::UnknownSnapshot(metadata.id.clone())),
        }
    }

    fn take_snapshot(&self, metadata: SnapshotMetadata, data: Bytes) -> Result<SnapshotMetadata, SnapshotError> {
        let chunks = self.split_into_chunks(&metadata, data);
        self.publish(StoredSnapshot { metadata, chunks })
    }
}

struct InMemoryReceivingSnapshot {
    store: InMemorySnapshotStore,
    metadata: SnapshotMetadata,
    chunks: BTreeMap<ChunkId, SnapshotChunk>,
    total_count: Option<u32>,
}

impl ReceivingSnapshot for InMemoryReceivingSnapshot {
    fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    fn apply(&mut self, chunk: SnapshotChunk) -> Result<(), SnapshotError> {
        if chunk.snapshot_id != self.metadata.id {
            return Err(SnapshotError::UnexpectedSnapshot {
                expected: self.metadata.id.clone(),
                actual: chunk.snapshot_id,
            });
        }
        if !chunk.verify_checksum() {
            return Err(SnapshotError::ChecksumMismatch(chunk.chunk_id));
        }

        self.total_count = Some(chunk.total_count);
        self.chunks.insert(chunk.chunk_id.clone(), chunk);
        Ok(())
    }

    fn persist(self: Box<Self>) -> Result<SnapshotMetadata, SnapshotError> {
        let received = self.chunks.len() as u32;
        match self.total_count {
            Some(expected) if expected == received => {}
            Some(expected) => return Err(SnapshotError::MissingChunks { expected, received }),
            None => return Err(SnapshotError::MissingChunks { expected: 1, received }),
        }

        let this = *self;
        this.store.publish(StoredSnapshot {
            metadata: this.metadata,
            chunks: this.chunks.into_iter().map(|(_, chunk)| chunk).collect(),
        })
    }

    fn abort(self: Box<Self>) {
        // Nothing was published; dropping the buffered chunks is enough.
    }
}

struct InMemoryChunkReader {
    snapshot: Arc<StoredSnapshot>,
    position: usize,
}

impl SnapshotChunkReader for InMemoryChunkReader {
    fn reset(&mut self) {
        self.position = 0;
    }

    fn seek(&mut self, chunk_id: &ChunkId) -> Result<(), SnapshotError> {
        match self.snapshot.chunks.iter().position(|c| &c.chunk_id == chunk_id) {
            Some(position) => {
                self.position = position;
                Ok(())
            }
            None => Err(SnapshotError::UnknownChunk(chunk_id.clone())),
        }
    }

    fn peek_next_id(&self) -> Option<ChunkId> {
        self.snapshot.chunks.get(self.position).map(|c| c.chunk_id.clone())
    }

    fn next(&mut self) -> Option<SnapshotChunk> {
        let chunk = self.snapshot.chunks.get(self.position).cloned();
        if chunk.is_some() {
            self.position += 1;
        }
        chunk
    }
}
