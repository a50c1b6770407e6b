//! This module is a raft-specific commit log that wraps the generic commit log.

mod log;
mod log_entry;

pub use log_entry::AdministrativeEntry;
pub use log_entry::ApplicationEntry;
pub use log_entry::EntryPayload;
pub use log_entry::RaftLogEntry;

pub(crate) use log::WriteAheadLog;
