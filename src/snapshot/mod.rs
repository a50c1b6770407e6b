mod in_memory;
mod store;

pub use in_memory::InMemorySnapshotStore;
pub use store::ChunkId;
pub use store::ReceivingSnapshot;
pub use store::SnapshotChunk;
pub use store::SnapshotChunkReader;
pub use store::SnapshotError;
pub use store::SnapshotId;
pub use store::SnapshotMetadata;
pub use store::SnapshotStore;
