mod cluster;
mod queue;

pub use cluster::AppendEvents;
pub use cluster::AppendTracker;
pub use cluster::SimulatedCluster;
pub use cluster::SimulatedReplica;
pub use cluster::SimulationOptions;
